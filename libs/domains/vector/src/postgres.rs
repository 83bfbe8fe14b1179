//! pgvector-backed namespace store.
//!
//! Each batch is written in one transaction: shared table, namespace table,
//! then the `general` replicas into the shared and `general` tables. A failed
//! batch rolls back whole, so the committed count in the error is exact.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observability::VectorStoreMetrics;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, QueryResult,
    Statement, TransactionTrait, Value,
};
use tracing::{debug, error, info};

use crate::config::{StoreConfig, PARAMS_PER_ROW};
use crate::error::{StoreError, StoreResult, WriteStage};
use crate::models::{Chunk, DeleteSummary, ScoredChunk, UpsertSummary, GENERAL_NAMESPACE};
use crate::repository::{
    prepare_upsert, validate_namespace, validate_query, validate_source, NamespaceStore,
};
use crate::sanitize::TableName;
use crate::schema::SchemaManager;

const CHUNK_COLUMNS: &str = "chunk_id, source, chunk_index, text, embedding::text AS embedding, namespace, created_at";

pub struct PgNamespaceStore {
    db: DatabaseConnection,
    config: StoreConfig,
    schema: SchemaManager,
}

struct BatchFailure {
    stage: WriteStage,
    message: String,
}

impl BatchFailure {
    fn at(stage: WriteStage) -> impl FnOnce(DbErr) -> BatchFailure {
        move |e| BatchFailure {
            stage,
            message: e.to_string(),
        }
    }
}

impl PgNamespaceStore {
    pub fn new(db: DatabaseConnection, config: StoreConfig) -> Self {
        let schema = SchemaManager::new(db.clone(), config.clone());
        Self { db, config, schema }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    /// Create the shared table and the `general` table up front
    pub async fn ensure_ready(&self) -> StoreResult<()> {
        self.schema.ensure_shared_table().await?;
        self.schema.ensure_namespace_table(GENERAL_NAMESPACE).await?;
        Ok(())
    }

    async fn write_batch(
        &self,
        batch: &[Chunk],
        namespace: &str,
        ns_table: &TableName,
        general_table: Option<&TableName>,
    ) -> Result<UpsertSummary, BatchFailure> {
        let shared = self.schema.shared_table();
        let txn = self
            .db
            .begin()
            .await
            .map_err(BatchFailure::at(WriteStage::SharedTable))?;

        self.check_ownership(&txn, &shared, batch, namespace).await?;

        let mut summary = UpsertSummary {
            shared: insert_rows(&txn, &shared, batch)
                .await
                .map_err(BatchFailure::at(WriteStage::SharedTable))?,
            namespace: insert_rows(&txn, ns_table, batch)
                .await
                .map_err(BatchFailure::at(WriteStage::NamespaceTable))?,
            general_copies: 0,
        };

        if let Some(general_table) = general_table {
            let copies: Vec<Chunk> = batch.iter().map(Chunk::general_copy).collect();
            summary.general_copies = insert_rows(&txn, &shared, &copies)
                .await
                .map_err(BatchFailure::at(WriteStage::GeneralCopyShared))?;
            insert_rows(&txn, general_table, &copies)
                .await
                .map_err(BatchFailure::at(WriteStage::GeneralCopyTable))?;
        }

        txn.commit()
            .await
            .map_err(BatchFailure::at(WriteStage::Commit))?;
        Ok(summary)
    }

    /// Refuse to overwrite ids already stored under a different namespace
    async fn check_ownership(
        &self,
        txn: &DatabaseTransaction,
        shared: &TableName,
        batch: &[Chunk],
        namespace: &str,
    ) -> Result<(), BatchFailure> {
        let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
        let row = txn
            .query_one_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "SELECT chunk_id, namespace FROM {} \
                     WHERE chunk_id = ANY($1) AND namespace <> $2 LIMIT 1",
                    shared.qualified()
                ),
                [ids.into(), namespace.into()],
            ))
            .await
            .map_err(BatchFailure::at(WriteStage::SharedTable))?;

        let Some(row) = row else {
            return Ok(());
        };
        let chunk_id: String = row
            .try_get("", "chunk_id")
            .map_err(BatchFailure::at(WriteStage::SharedTable))?;
        let owner: String = row
            .try_get("", "namespace")
            .map_err(BatchFailure::at(WriteStage::SharedTable))?;

        Err(BatchFailure {
            stage: WriteStage::SharedTable,
            message: format!(
                "chunk_id {} already belongs to namespace '{}'",
                chunk_id, owner
            ),
        })
    }

    async fn delete_where(
        &self,
        namespace: &str,
        shared_filter: &str,
        table_filter: &str,
        key: Value,
    ) -> StoreResult<DeleteSummary> {
        self.schema.ensure_shared_table().await?;
        let ns_table = self.schema.resolve_existing(namespace).await?;
        let shared = self.schema.shared_table();
        let delete_err = |e: DbErr| StoreError::Delete(e.to_string());

        let txn = self.db.begin().await.map_err(delete_err)?;

        let shared_rows = txn
            .execute_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "DELETE FROM {} WHERE {} AND namespace = $2",
                    shared.qualified(),
                    shared_filter
                ),
                [key.clone(), namespace.into()],
            ))
            .await
            .map_err(delete_err)?
            .rows_affected();

        let namespace_rows = match &ns_table {
            Some(table) => txn
                .execute_raw(Statement::from_sql_and_values(
                    DbBackend::Postgres,
                    format!("DELETE FROM {} WHERE {}", table.qualified(), table_filter),
                    [key],
                ))
                .await
                .map_err(delete_err)?
                .rows_affected(),
            None => 0,
        };

        txn.commit().await.map_err(delete_err)?;

        VectorStoreMetrics::record_delete(shared_rows, namespace_rows);
        Ok(DeleteSummary {
            shared: shared_rows,
            namespace: namespace_rows,
        })
    }

    async fn select_chunks(&self, sql: String, values: Vec<Value>) -> StoreResult<Vec<QueryResult>> {
        self.schema.ensure_shared_table().await?;
        self.db
            .query_all_raw(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                values,
            ))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

#[async_trait]
impl NamespaceStore for PgNamespaceStore {
    async fn upsert(&self, chunks: Vec<Chunk>, namespace: &str) -> StoreResult<UpsertSummary> {
        let started = Instant::now();
        let chunks = prepare_upsert(chunks, namespace, self.config.embedding_dimension)?;
        if chunks.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let ns_table = self.schema.ensure_namespace_table(namespace).await?;
        let general_table = if self.config.should_copy_to_general(namespace) {
            Some(self.schema.ensure_namespace_table(GENERAL_NAMESPACE).await?)
        } else {
            None
        };

        let attempted = chunks.len();
        let mut committed = UpsertSummary::default();

        for (index, batch) in chunks.chunks(self.config.batch_size).enumerate() {
            match self
                .write_batch(batch, namespace, &ns_table, general_table.as_ref())
                .await
            {
                Ok(summary) => {
                    debug!(
                        namespace,
                        batch = index,
                        shared = summary.shared,
                        copies = summary.general_copies,
                        "Batch committed"
                    );
                    committed.merge(summary);
                }
                Err(failure) => {
                    VectorStoreMetrics::record_write_failure(failure.stage.as_str());
                    error!(
                        namespace,
                        batch = index,
                        stage = %failure.stage,
                        committed = committed.shared,
                        attempted,
                        error = %failure.message,
                        "Upsert failed"
                    );
                    return Err(StoreError::Write {
                        stage: failure.stage,
                        committed,
                        attempted,
                        message: failure.message,
                    });
                }
            }
        }

        VectorStoreMetrics::record_upsert(
            committed.shared,
            committed.namespace,
            committed.general_copies,
            started.elapsed().as_millis() as u64,
        );
        info!(
            namespace,
            table = %ns_table.table(),
            shared = committed.shared,
            namespace_rows = committed.namespace,
            general_copies = committed.general_copies,
            "Upserted chunks"
        );
        Ok(committed)
    }

    async fn query(
        &self,
        embedding: &[f32],
        namespace: &str,
        k: usize,
        source: Option<String>,
    ) -> StoreResult<Vec<ScoredChunk>> {
        let started = Instant::now();
        validate_query(embedding, namespace, k, self.config.embedding_dimension)?;

        let shared = self.schema.shared_table();
        let mut values: Vec<Value> = vec![vector_literal(embedding).into(), namespace.into()];
        let source_filter = match source {
            Some(source) => {
                values.push(source.into());
                format!("AND source = ${}", values.len())
            }
            None => String::new(),
        };
        values.push(limit_param(k).into());

        let sql = format!(
            "SELECT {}, (embedding <=> $1::vector)::float8 AS distance \
             FROM {} WHERE namespace = $2 {} \
             ORDER BY distance, chunk_id LIMIT ${}",
            CHUNK_COLUMNS,
            shared.qualified(),
            source_filter,
            values.len()
        );

        let rows = self.select_chunks(sql, values).await?;
        let results = rows
            .iter()
            .map(|row| {
                Ok(ScoredChunk {
                    chunk: chunk_from_row(row)?,
                    distance: row
                        .try_get("", "distance")
                        .map_err(|e| StoreError::Query(e.to_string()))?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        VectorStoreMetrics::record_query(results.len(), started.elapsed().as_millis() as u64);
        Ok(results)
    }

    async fn delete_by_source(&self, source: &str, namespace: &str) -> StoreResult<DeleteSummary> {
        validate_namespace(namespace)?;
        validate_source(source)?;

        let summary = self
            .delete_where(namespace, "source = $1", "source = $1", source.into())
            .await?;
        info!(
            namespace,
            source,
            shared = summary.shared,
            namespace_rows = summary.namespace,
            "Deleted chunks by source"
        );
        Ok(summary)
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

        let summary = self
            .delete_where(
                namespace,
                "chunk_id = ANY($1)",
                "chunk_id = ANY($1)",
                chunk_ids.to_vec().into(),
            )
            .await?;
        info!(
            namespace,
            requested = chunk_ids.len(),
            shared = summary.shared,
            namespace_rows = summary.namespace,
            "Deleted chunks by id"
        );
        Ok(summary)
    }

    async fn get_by_source(&self, source: &str, namespace: &str) -> StoreResult<Vec<Chunk>> {
        validate_namespace(namespace)?;
        validate_source(source)?;

        let sql = format!(
            "SELECT {} FROM {} WHERE namespace = $1 AND source = $2 \
             ORDER BY chunk_index, created_at",
            CHUNK_COLUMNS,
            self.schema.shared_table().qualified()
        );
        self.select_chunks(sql, vec![namespace.into(), source.into()])
            .await?
            .iter()
            .map(chunk_from_row)
            .collect()
    }

    async fn count_by_source(&self, source: &str, namespace: &str) -> StoreResult<u64> {
        validate_namespace(namespace)?;
        validate_source(source)?;

        let sql = format!(
            "SELECT COUNT(*)::bigint AS n FROM {} WHERE namespace = $1 AND source = $2",
            self.schema.shared_table().qualified()
        );
        let rows = self
            .select_chunks(sql, vec![namespace.into(), source.into()])
            .await?;
        let count: i64 = match rows.first() {
            Some(row) => row
                .try_get("", "n")
                .map_err(|e| StoreError::Query(e.to_string()))?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn list_sources(&self, namespace: &str) -> StoreResult<Vec<String>> {
        validate_namespace(namespace)?;

        let sql = format!(
            "SELECT DISTINCT source FROM {} WHERE namespace = $1 ORDER BY source",
            self.schema.shared_table().qualified()
        );
        self.select_chunks(sql, vec![namespace.into()])
            .await?
            .iter()
            .map(|row| {
                row.try_get("", "source")
                    .map_err(|e| StoreError::Query(e.to_string()))
            })
            .collect()
    }
}

/// Multi-row upsert into `table`; returns rows inserted or replaced.
///
/// A stored row is only replaced by a row of the same namespace that is not older.
async fn insert_rows(
    txn: &DatabaseTransaction,
    table: &TableName,
    chunks: &[Chunk],
) -> Result<usize, DbErr> {
    if chunks.is_empty() {
        return Ok(0);
    }

    let mut placeholders = Vec::with_capacity(chunks.len());
    let mut values: Vec<Value> = Vec::with_capacity(chunks.len() * PARAMS_PER_ROW);
    for (row, chunk) in chunks.iter().enumerate() {
        let p = row * PARAMS_PER_ROW;
        placeholders.push(format!(
            "(${}, ${}, ${}, ${}, ${}::vector, ${}, ${})",
            p + 1,
            p + 2,
            p + 3,
            p + 4,
            p + 5,
            p + 6,
            p + 7
        ));
        values.push(chunk.chunk_id.clone().into());
        values.push(chunk.source.clone().into());
        values.push(chunk.chunk_index.into());
        values.push(chunk.text.clone().into());
        values.push(vector_literal(&chunk.embedding).into());
        values.push(chunk.namespace.clone().into());
        values.push(chunk.created_at.into());
    }

    let sql = format!(
        "INSERT INTO {} AS t (chunk_id, source, chunk_index, text, embedding, namespace, created_at) \
         VALUES {} \
         ON CONFLICT (chunk_id) DO UPDATE SET \
             source = EXCLUDED.source, \
             chunk_index = EXCLUDED.chunk_index, \
             text = EXCLUDED.text, \
             embedding = EXCLUDED.embedding, \
             namespace = EXCLUDED.namespace, \
             created_at = EXCLUDED.created_at \
         WHERE t.created_at <= EXCLUDED.created_at AND t.namespace = EXCLUDED.namespace",
        table.qualified(),
        placeholders.join(", ")
    );

    let result = txn
        .execute_raw(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .await?;
    Ok(result.rows_affected() as usize)
}

/// `LIMIT` bind value; anything past `i64::MAX` is effectively unbounded
fn limit_param(k: usize) -> i64 {
    i64::try_from(k).unwrap_or(i64::MAX)
}

/// pgvector text form, e.g. `[0.1,0.2]`
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

pub(crate) fn parse_vector_literal(raw: &str) -> Option<Vec<f32>> {
    let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect()
}

fn chunk_from_row(row: &QueryResult) -> StoreResult<Chunk> {
    let query_err = |e: DbErr| StoreError::Query(e.to_string());
    let raw_embedding: String = row.try_get("", "embedding").map_err(query_err)?;
    let embedding = parse_vector_literal(&raw_embedding)
        .ok_or_else(|| StoreError::Query(format!("unreadable vector: {}", raw_embedding)))?;
    let created_at: DateTime<Utc> = row.try_get("", "created_at").map_err(query_err)?;

    Ok(Chunk {
        chunk_id: row.try_get("", "chunk_id").map_err(query_err)?,
        source: row.try_get("", "source").map_err(query_err)?,
        chunk_index: row.try_get("", "chunk_index").map_err(query_err)?,
        text: row.try_get("", "text").map_err(query_err)?,
        embedding,
        namespace: row.try_get("", "namespace").map_err(query_err)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn store(dimension: usize) -> PgNamespaceStore {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        PgNamespaceStore::new(db, StoreConfig::default().with_dimension(dimension))
    }

    #[test]
    fn test_vector_literal_round_trip() {
        let v = vec![0.25, -1.0, 3.5];
        assert_eq!(vector_literal(&v), "[0.25,-1,3.5]");
        assert_eq!(parse_vector_literal("[0.25,-1,3.5]"), Some(v));
        assert_eq!(parse_vector_literal("[]"), Some(vec![]));
        assert_eq!(parse_vector_literal("0.25,-1"), None);
        assert_eq!(parse_vector_literal("[a,b]"), None);
    }

    #[test]
    fn test_limit_param_saturates() {
        assert_eq!(limit_param(4), 4);
        assert_eq!(limit_param(usize::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_empty_upsert_does_no_io() {
        let summary = store(2).upsert(vec![], "project-a").await.unwrap();
        assert_eq!(summary, UpsertSummary::default());
    }

    #[tokio::test]
    async fn test_preconditions_fail_before_io() {
        let store = store(2);

        let wrong_dim = vec![Chunk::new("project-a", "doc-1", 0, "x", vec![1.0, 0.0, 0.0])];
        assert!(matches!(
            store.upsert(wrong_dim, "project-a").await,
            Err(StoreError::Precondition(_))
        ));
        assert!(matches!(
            store.query(&[1.0, 0.0], "project-a", 0, None).await,
            Err(StoreError::Precondition(_))
        ));
        assert!(matches!(
            store.query(&[1.0], "project-a", 3, None).await,
            Err(StoreError::Precondition(_))
        ));
        assert!(matches!(
            store.delete_by_source("", "project-a").await,
            Err(StoreError::Precondition(_))
        ));
        assert_eq!(
            store.delete_by_chunk_ids(&[], "project-a").await.unwrap(),
            DeleteSummary::default()
        );
    }
}
