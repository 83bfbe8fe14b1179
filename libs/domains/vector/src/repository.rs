use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::models::{Chunk, DeleteSummary, ScoredChunk, UpsertSummary};

/// Namespace-scoped chunk storage.
///
/// Every operation takes the namespace explicitly; nothing is inferred from
/// the chunks themselves. Reads and deletes never cross into another
/// namespace's rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Write chunks to the shared and namespace tables, plus `general`
    /// replicas unless the namespace is exempt. Colliding `chunk_id`s replace
    /// the stored row when the incoming `created_at` is not older.
    async fn upsert(&self, chunks: Vec<Chunk>, namespace: &str) -> StoreResult<UpsertSummary>;

    /// Nearest chunks by cosine distance, ascending, at most `k`
    async fn query(
        &self,
        embedding: &[f32],
        namespace: &str,
        k: usize,
        source: Option<String>,
    ) -> StoreResult<Vec<ScoredChunk>>;

    /// Remove `source` from the namespace; `general` replicas are left alone
    async fn delete_by_source(&self, source: &str, namespace: &str) -> StoreResult<DeleteSummary>;

    /// Remove specific chunks, only where they belong to `namespace`
    async fn delete_by_chunk_ids(
        &self,
        chunk_ids: &[String],
        namespace: &str,
    ) -> StoreResult<DeleteSummary>;

    /// All chunks of `source` in `namespace`, ordered by `chunk_index`
    async fn get_by_source(&self, source: &str, namespace: &str) -> StoreResult<Vec<Chunk>>;

    async fn count_by_source(&self, source: &str, namespace: &str) -> StoreResult<u64>;

    /// Distinct sources in `namespace`, sorted
    async fn list_sources(&self, namespace: &str) -> StoreResult<Vec<String>>;
}

fn precondition(message: impl Into<String>) -> StoreError {
    StoreError::Precondition(message.into())
}

pub(crate) fn validate_namespace(namespace: &str) -> StoreResult<()> {
    if namespace.trim().is_empty() {
        return Err(precondition("namespace must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_source(source: &str) -> StoreResult<()> {
    if source.trim().is_empty() {
        return Err(precondition("source must not be empty"));
    }
    Ok(())
}

fn validate_vector(embedding: &[f32], dimension: usize, what: &str) -> StoreResult<()> {
    if embedding.len() != dimension {
        return Err(precondition(format!(
            "{} has dimension {}, expected {}",
            what,
            embedding.len(),
            dimension
        )));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(precondition(format!("{} contains non-finite values", what)));
    }
    // cosine distance to a zero vector is undefined
    if embedding.iter().all(|x| *x == 0.0) {
        return Err(precondition(format!("{} must not be the zero vector", what)));
    }
    Ok(())
}

/// Check a whole upsert before any I/O and collapse duplicate ids.
///
/// When the same `chunk_id` appears twice the later `created_at` wins, and on
/// a tie the later position in the input. Input order is otherwise kept.
pub(crate) fn prepare_upsert(
    chunks: Vec<Chunk>,
    namespace: &str,
    dimension: usize,
) -> StoreResult<Vec<Chunk>> {
    validate_namespace(namespace)?;

    for chunk in &chunks {
        if chunk.namespace != namespace {
            return Err(precondition(format!(
                "chunk {} carries namespace '{}' but upsert targets '{}'",
                chunk.chunk_id, chunk.namespace, namespace
            )));
        }
        if chunk.chunk_id.trim().is_empty() {
            return Err(precondition("chunk_id must not be empty"));
        }
        if chunk.text.trim().is_empty() {
            return Err(precondition(format!(
                "chunk {} has empty text",
                chunk.chunk_id
            )));
        }
        validate_source(&chunk.source)?;
        if chunk.chunk_index < 0 {
            return Err(precondition(format!(
                "chunk {} has negative chunk_index",
                chunk.chunk_id
            )));
        }
        validate_vector(
            &chunk.embedding,
            dimension,
            &format!("embedding of chunk {}", chunk.chunk_id),
        )?;
    }

    let mut position: HashMap<String, usize> = HashMap::with_capacity(chunks.len());
    let mut unique: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match position.get(&chunk.chunk_id) {
            Some(&at) => {
                if chunk.created_at >= unique[at].created_at {
                    unique[at] = chunk;
                }
            }
            None => {
                position.insert(chunk.chunk_id.clone(), unique.len());
                unique.push(chunk);
            }
        }
    }
    Ok(unique)
}

pub(crate) fn validate_query(
    embedding: &[f32],
    namespace: &str,
    k: usize,
    dimension: usize,
) -> StoreResult<()> {
    validate_namespace(namespace)?;
    if k == 0 {
        return Err(precondition("k must be positive"));
    }
    validate_vector(embedding, dimension, "query embedding")
}
