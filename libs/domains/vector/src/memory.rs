//! In-process namespace store with the same write, isolation and replication
//! rules as the Postgres store. Used by service tests and local tooling.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::error::{SchemaError, StoreError, StoreResult, WriteStage};
use crate::models::{Chunk, DeleteSummary, ScoredChunk, UpsertSummary, GENERAL_NAMESPACE};
use crate::repository::{
    prepare_upsert, validate_namespace, validate_query, validate_source, NamespaceStore,
};
use crate::sanitize::sanitize;

type Rows = BTreeMap<String, Chunk>;

#[derive(Default)]
struct State {
    shared: Rows,
    tables: HashMap<String, Rows>,
    /// table name -> owning raw namespace
    owners: HashMap<String, String>,
}

pub struct InMemoryNamespaceStore {
    config: StoreConfig,
    state: Mutex<State>,
    fail_at: Option<(usize, WriteStage)>,
}

impl InMemoryNamespaceStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            fail_at: None,
        }
    }

    /// Fail batch `batch` (zero-based, per upsert call) at `stage`; that batch writes nothing
    pub fn with_failure_at(mut self, batch: usize, stage: WriteStage) -> Self {
        self.fail_at = Some((batch, stage));
        self
    }

    pub async fn shared_rows(&self) -> Vec<Chunk> {
        self.state.lock().await.shared.values().cloned().collect()
    }

    /// Rows of a namespace table by its sanitized name, `None` if never created
    pub async fn table_rows(&self, table: &str) -> Option<Vec<Chunk>> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
    }

    pub async fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.state.lock().await.tables.keys().cloned().collect();
        tables.sort();
        tables
    }

    fn table_for(&self, namespace: &str) -> Result<String, SchemaError> {
        let table = sanitize(namespace);
        if table == self.config.shared_table || table == self.config.registry_table {
            return Err(SchemaError::ReservedName {
                namespace: namespace.to_string(),
                table,
            });
        }
        Ok(table)
    }

    fn claim(state: &mut State, namespace: &str, table: &str) -> Result<(), SchemaError> {
        match state.owners.get(table) {
            Some(owner) if owner != namespace => Err(SchemaError::NamespaceConflict {
                requested: namespace.to_string(),
                table: table.to_string(),
                owner: owner.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .owners
                    .insert(table.to_string(), namespace.to_string());
                state.tables.entry(table.to_string()).or_default();
                Ok(())
            }
        }
    }

    fn existing_table(&self, state: &State, namespace: &str) -> Result<Option<String>, SchemaError> {
        let Ok(table) = self.table_for(namespace) else {
            return Ok(None);
        };
        match state.owners.get(&table) {
            Some(owner) if owner == namespace => Ok(Some(table)),
            Some(owner) => Err(SchemaError::NamespaceConflict {
                requested: namespace.to_string(),
                table,
                owner: owner.clone(),
            }),
            None => Ok(None),
        }
    }

    fn delete_matching<F>(&self, state: &mut State, namespace: &str, matches: F) -> StoreResult<DeleteSummary>
    where
        F: Fn(&Chunk) -> bool,
    {
        let table = self.existing_table(state, namespace)?;

        let before = state.shared.len();
        state
            .shared
            .retain(|_, c| !(c.namespace == namespace && matches(c)));
        let shared = (before - state.shared.len()) as u64;

        let namespace_rows = match table.and_then(|t| state.tables.get_mut(&t)) {
            Some(rows) => {
                let before = rows.len();
                rows.retain(|_, c| !matches(c));
                (before - rows.len()) as u64
            }
            None => 0,
        };

        Ok(DeleteSummary {
            shared,
            namespace: namespace_rows,
        })
    }
}

/// Insert or replace under the same rule as the SQL upsert
fn write_rows(rows: &mut Rows, chunks: &[Chunk]) -> usize {
    let mut written = 0;
    for chunk in chunks {
        let replace = match rows.get(&chunk.chunk_id) {
            Some(existing) => {
                existing.namespace == chunk.namespace && existing.created_at <= chunk.created_at
            }
            None => true,
        };
        if replace {
            rows.insert(chunk.chunk_id.clone(), chunk.clone());
            written += 1;
        }
    }
    written
}

pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return f64::NAN;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl NamespaceStore for InMemoryNamespaceStore {
    async fn upsert(&self, chunks: Vec<Chunk>, namespace: &str) -> StoreResult<UpsertSummary> {
        let chunks = prepare_upsert(chunks, namespace, self.config.embedding_dimension)?;
        if chunks.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let table = self.table_for(namespace)?;
        let copy = self.config.should_copy_to_general(namespace);

        let mut state = self.state.lock().await;
        Self::claim(&mut state, namespace, &table)?;
        let general_table = if copy {
            let general = self.table_for(GENERAL_NAMESPACE)?;
            Self::claim(&mut state, GENERAL_NAMESPACE, &general)?;
            Some(general)
        } else {
            None
        };

        let attempted = chunks.len();
        let mut committed = UpsertSummary::default();

        for (index, batch) in chunks.chunks(self.config.batch_size).enumerate() {
            let write_err = |stage: WriteStage, message: String| StoreError::Write {
                stage,
                committed,
                attempted,
                message,
            };

            if let Some((_, stage)) = self.fail_at.filter(|(at, _)| *at == index) {
                return Err(write_err(stage, "injected failure".to_string()));
            }

            if let Some(foreign) = batch.iter().find_map(|c| {
                state
                    .shared
                    .get(&c.chunk_id)
                    .filter(|existing| existing.namespace != namespace)
            }) {
                return Err(write_err(
                    WriteStage::SharedTable,
                    format!(
                        "chunk_id {} already belongs to namespace '{}'",
                        foreign.chunk_id, foreign.namespace
                    ),
                ));
            }

            let mut summary = UpsertSummary {
                shared: write_rows(&mut state.shared, batch),
                namespace: write_rows(state.tables.entry(table.clone()).or_default(), batch),
                general_copies: 0,
            };

            if let Some(general) = &general_table {
                let copies: Vec<Chunk> = batch.iter().map(Chunk::general_copy).collect();
                summary.general_copies = write_rows(&mut state.shared, &copies);
                write_rows(state.tables.entry(general.clone()).or_default(), &copies);
            }

            committed.merge(summary);
        }

        Ok(committed)
    }

    async fn query(
        &self,
        embedding: &[f32],
        namespace: &str,
        k: usize,
        source: Option<String>,
    ) -> StoreResult<Vec<ScoredChunk>> {
        validate_query(embedding, namespace, k, self.config.embedding_dimension)?;

        let state = self.state.lock().await;
        let mut hits: Vec<ScoredChunk> = state
            .shared
            .values()
            .filter(|c| c.namespace == namespace)
            .filter(|c| source.as_deref().is_none_or(|s| c.source == s))
            .map(|c| ScoredChunk {
                chunk: c.clone(),
                distance: cosine_distance(embedding, &c.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_source(&self, source: &str, namespace: &str) -> StoreResult<DeleteSummary> {
        validate_namespace(namespace)?;
        validate_source(source)?;

        let mut state = self.state.lock().await;
        self.delete_matching(&mut state, namespace, |c| c.source == source)
    }

    async fn delete_by_chunk_ids(
        &self,
        chunk_ids: &[String],
        namespace: &str,
    ) -> StoreResult<DeleteSummary> {
        validate_namespace(namespace)?;
        if chunk_ids.is_empty() {
            return Ok(DeleteSummary::default());
        }

        let mut state = self.state.lock().await;
        self.delete_matching(&mut state, namespace, |c| chunk_ids.contains(&c.chunk_id))
    }

    async fn get_by_source(&self, source: &str, namespace: &str) -> StoreResult<Vec<Chunk>> {
        validate_namespace(namespace)?;
        validate_source(source)?;

        let state = self.state.lock().await;
        let mut chunks: Vec<Chunk> = state
            .shared
            .values()
            .filter(|c| c.namespace == namespace && c.source == source)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| {
            a.chunk_index
                .cmp(&b.chunk_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(chunks)
    }

    async fn count_by_source(&self, source: &str, namespace: &str) -> StoreResult<u64> {
        Ok(self.get_by_source(source, namespace).await?.len() as u64)
    }

    async fn list_sources(&self, namespace: &str) -> StoreResult<Vec<String>> {
        validate_namespace(namespace)?;

        let state = self.state.lock().await;
        let mut sources: Vec<String> = state
            .shared
            .values()
            .filter(|c| c.namespace == namespace)
            .map(|c| c.source.clone())
            .collect();
        sources.sort();
        sources.dedup();
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use test_utils::assertions::assert_non_decreasing;
    use test_utils::TestDataBuilder;

    const DIM: usize = 8;

    fn store() -> InMemoryNamespaceStore {
        InMemoryNamespaceStore::new(StoreConfig::default().with_dimension(DIM))
    }

    fn doc(builder: &TestDataBuilder, namespace: &str, source: &str, n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| {
                Chunk::new(
                    namespace,
                    source,
                    i as i32,
                    format!("chunk {i} of {source}"),
                    builder.embedding(DIM, i as u64),
                )
            })
            .collect()
    }

    fn count_ns(rows: &[Chunk], namespace: &str) -> usize {
        rows.iter().filter(|c| c.namespace == namespace).count()
    }

    #[tokio::test]
    async fn test_upsert_replicates_to_general() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("scenario_a");

        let summary = store
            .upsert(doc(&builder, "project-a", "doc-1", 3), "project-a")
            .await
            .unwrap();

        assert_eq!(
            summary,
            UpsertSummary {
                shared: 3,
                namespace: 3,
                general_copies: 3
            }
        );

        let shared = store.shared_rows().await;
        assert_eq!(count_ns(&shared, "project-a"), 3);
        assert_eq!(count_ns(&shared, GENERAL_NAMESPACE), 3);
        assert_eq!(store.table_rows("project_a").await.unwrap().len(), 3);
        assert_eq!(store.table_rows("general").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_auto_copies_are_distinct_chunks_with_same_content() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("auto_copy");
        let chunks = doc(&builder, "project-a", "doc-1", 4);
        store.upsert(chunks.clone(), "project-a").await.unwrap();

        let general = store.get_by_source("doc-1", GENERAL_NAMESPACE).await.unwrap();
        assert_eq!(general.len(), 4);
        for (original, copy) in chunks.iter().zip(&general) {
            assert_ne!(original.chunk_id, copy.chunk_id);
            assert_eq!(original.text, copy.text);
            assert_eq!(original.embedding, copy.embedding);
            assert_eq!(original.source, copy.source);
            assert_eq!(original.chunk_index, copy.chunk_index);
        }
    }

    #[tokio::test]
    async fn test_delete_leaves_general_copies() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("scenario_b");
        store
            .upsert(doc(&builder, "project-a", "doc-1", 3), "project-a")
            .await
            .unwrap();

        let deleted = store.delete_by_source("doc-1", "project-a").await.unwrap();
        assert_eq!(
            deleted,
            DeleteSummary {
                shared: 3,
                namespace: 3
            }
        );

        let shared = store.shared_rows().await;
        assert_eq!(count_ns(&shared, "project-a"), 0);
        assert_eq!(count_ns(&shared, GENERAL_NAMESPACE), 3);
        assert!(store.table_rows("project_a").await.unwrap().is_empty());
        assert_eq!(store.table_rows("general").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_isolated_between_namespaces() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("isolation");
        store
            .upsert(doc(&builder, "team-1", "shared-doc", 2), "team-1")
            .await
            .unwrap();
        store
            .upsert(doc(&builder, "team-2", "shared-doc", 2), "team-2")
            .await
            .unwrap();

        store.delete_by_source("shared-doc", "team-1").await.unwrap();

        assert_eq!(store.count_by_source("shared-doc", "team-2").await.unwrap(), 2);
        assert_eq!(store.table_rows("team_2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exempt_namespace_gets_no_copies() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("scenario_c");
        let summary = store
            .upsert(doc(&builder, "totalsoft-client", "doc-1", 2), "totalsoft-client")
            .await
            .unwrap();

        assert_eq!(summary.general_copies, 0);
        assert_eq!(count_ns(&store.shared_rows().await, GENERAL_NAMESPACE), 0);
        assert!(store.table_rows("general").await.is_none());
    }

    #[tokio::test]
    async fn test_general_namespace_is_not_copied_to_itself() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("general_direct");
        let summary = store
            .upsert(doc(&builder, GENERAL_NAMESPACE, "doc-1", 2), GENERAL_NAMESPACE)
            .await
            .unwrap();

        assert_eq!(summary.general_copies, 0);
        assert_eq!(store.shared_rows().await.len(), 2);
    }

    #[tokio::test]
    async fn test_query_returns_fewer_than_k() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("scenario_d");
        store
            .upsert(doc(&builder, "project-a", "doc-1", 2), "project-a")
            .await
            .unwrap();

        let hits = store
            .query(&builder.embedding(DIM, 0), "project-a", 4, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.namespace == "project-a"));
    }

    #[tokio::test]
    async fn test_query_ordering_is_stable() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("ordering");
        store
            .upsert(doc(&builder, "project-a", "doc-1", 6), "project-a")
            .await
            .unwrap();
        store
            .upsert(doc(&builder, "project-a", "doc-2", 6), "project-a")
            .await
            .unwrap();

        let probe = builder.embedding(DIM, 3);
        let first = store.query(&probe, "project-a", 5, None).await.unwrap();
        let second = store.query(&probe, "project-a", 5, None).await.unwrap();

        assert_eq!(first.len(), 5);
        let distances: Vec<f64> = first.iter().map(|h| h.distance).collect();
        assert_non_decreasing(&distances, "query");
        assert!(first[0].distance.abs() < 1e-6);
        assert_eq!(first, second);

        let filtered = store
            .query(&probe, "project-a", 20, Some("doc-2".to_string()))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 6);
        assert!(filtered.iter().all(|h| h.chunk.source == "doc-2"));
    }

    #[tokio::test]
    async fn test_query_empty_namespace_is_ok() {
        let hits = store()
            .query(&TestDataBuilder::axis(DIM, 0), "nobody", 3, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_same_chunk_id_keeps_latest() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("uniqueness");
        let now = Utc::now();
        let id = builder.chunk_id(0);

        let old = Chunk::new("project-a", "doc-1", 0, "old", builder.embedding(DIM, 1))
            .with_chunk_id(&id)
            .with_created_at(now - Duration::seconds(10));
        let new = Chunk::new("project-a", "doc-1", 0, "new", builder.embedding(DIM, 2))
            .with_chunk_id(&id)
            .with_created_at(now);

        store.upsert(vec![new.clone()], "project-a").await.unwrap();
        let summary = store.upsert(vec![old], "project-a").await.unwrap();
        assert_eq!(summary.shared, 0);

        let rows: Vec<Chunk> = store
            .shared_rows()
            .await
            .into_iter()
            .filter(|c| c.chunk_id == id)
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "new");
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("idempotent");
        let chunks = doc(&builder, "project-a", "doc-1", 3);

        store.upsert(chunks.clone(), "project-a").await.unwrap();
        store.upsert(chunks, "project-a").await.unwrap();

        assert_eq!(store.shared_rows().await.len(), 6);
        assert_eq!(store.table_rows("project_a").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_foreign_chunk_id_is_rejected() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("foreign");
        let id = builder.chunk_id(9);

        let mine = Chunk::new("team-1", "doc", 0, "a", builder.embedding(DIM, 0)).with_chunk_id(&id);
        let theirs = Chunk::new("team-2", "doc", 0, "b", builder.embedding(DIM, 0)).with_chunk_id(&id);

        store.upsert(vec![mine], "team-1").await.unwrap();
        let err = store.upsert(vec![theirs], "team-2").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Write {
                stage: WriteStage::SharedTable,
                ..
            }
        ));
        assert_eq!(store.count_by_source("doc", "team-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_reports_committed_batches() {
        let store = InMemoryNamespaceStore::new(
            StoreConfig::default().with_dimension(DIM).with_batch_size(2),
        )
        .with_failure_at(1, WriteStage::NamespaceTable);
        let builder = TestDataBuilder::from_test_name("partial");

        let err = store
            .upsert(doc(&builder, "project-a", "doc-1", 5), "project-a")
            .await
            .unwrap_err();

        match err {
            StoreError::Write {
                stage,
                committed,
                attempted,
                ..
            } => {
                assert_eq!(stage, WriteStage::NamespaceTable);
                assert_eq!(committed.shared, 2);
                assert_eq!(committed.general_copies, 2);
                assert_eq!(attempted, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.count_by_source("doc-1", "project-a").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_colliding_namespaces_are_rejected() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("collision");
        store
            .upsert(doc(&builder, "proj-a", "doc-1", 1), "proj-a")
            .await
            .unwrap();

        let err = store
            .upsert(doc(&builder, "proj.a", "doc-1", 1), "proj.a")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Schema(SchemaError::NamespaceConflict { .. })
        ));

        let err = store.delete_by_source("doc-1", "proj.a").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Schema(SchemaError::NamespaceConflict { .. })
        ));
        assert_eq!(store.count_by_source("doc-1", "proj-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_chunk_ids_is_scoped() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("delete_ids");
        let chunks = doc(&builder, "project-a", "doc-1", 3);
        store.upsert(chunks.clone(), "project-a").await.unwrap();

        let ids = vec![chunks[0].chunk_id.clone(), chunks[1].chunk_id.clone()];
        // wrong namespace touches nothing
        let none = store.delete_by_chunk_ids(&ids, "project-b").await.unwrap();
        assert!(none.is_empty());

        let deleted = store.delete_by_chunk_ids(&ids, "project-a").await.unwrap();
        assert_eq!(deleted.shared, 2);
        assert_eq!(deleted.namespace, 2);
        assert_eq!(store.count_by_source("doc-1", "project-a").await.unwrap(), 1);
        assert_eq!(store.count_by_source("doc-1", GENERAL_NAMESPACE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_sources_sorted_and_distinct() {
        let store = store();
        let builder = TestDataBuilder::from_test_name("sources");
        for source in ["b-doc", "a-doc", "b-doc"] {
            store
                .upsert(doc(&builder, "project-a", source, 2), "project-a")
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_sources("project-a").await.unwrap(),
            vec!["a-doc".to_string(), "b-doc".to_string()]
        );
        assert!(store.list_sources("project-z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_writes_share_one_table() {
        let store = Arc::new(store());
        let builder = TestDataBuilder::from_test_name("scenario_e");
        let first = doc(&builder, "team-x", "doc-1", 3);
        let second = doc(&builder, "team-x", "doc-2", 3);

        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                async move { store.upsert(first, "team-x").await }
            },
            {
                let store = store.clone();
                async move { store.upsert(second, "team-x").await }
            }
        );
        a.unwrap();
        b.unwrap();

        let team_tables: Vec<String> = store
            .tables()
            .await
            .into_iter()
            .filter(|t| t == "team_x")
            .collect();
        assert_eq!(team_tables.len(), 1);
        assert_eq!(store.table_rows("team_x").await.unwrap().len(), 6);
    }
}
