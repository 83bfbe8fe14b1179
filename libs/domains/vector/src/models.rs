use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Reserved namespace that receives auto-copies and is the routing default
pub const GENERAL_NAMESPACE: &str = "general";

/// One embedded unit of document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Primary dedup key across the shared table
    pub chunk_id: String,
    pub source: String,
    pub chunk_index: i32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub namespace: String,
    /// Tie-breaker for last-write-wins; microsecond precision to match `timestamptz`
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Build a chunk whose id is derived from its content and position
    pub fn new(
        namespace: impl Into<String>,
        source: impl Into<String>,
        chunk_index: i32,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let namespace = namespace.into();
        let source = source.into();
        let text = text.into();
        let chunk_id = derive_chunk_id(&namespace, &source, chunk_index, &text);

        Self {
            chunk_id,
            source,
            chunk_index,
            text,
            embedding,
            namespace,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn with_chunk_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = chunk_id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at.trunc_subsecs(6);
        self
    }

    /// Replica of this chunk for the `general` namespace, under its own id
    pub fn general_copy(&self) -> Chunk {
        Chunk {
            chunk_id: general_copy_id(&self.chunk_id),
            namespace: GENERAL_NAMESPACE.to_string(),
            ..self.clone()
        }
    }
}

/// Chunk id as a function of `(namespace, source, chunk_index, text)`.
///
/// Re-ingesting the same document into the same namespace yields the same
/// ids, so a retried ingestion replaces rows instead of duplicating them.
pub fn derive_chunk_id(namespace: &str, source: &str, chunk_index: i32, text: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [namespace.as_bytes(), source.as_bytes(), text.as_bytes()] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hasher.update(chunk_index.to_le_bytes());
    digest_to_id(&hasher.finalize())
}

fn general_copy_id(chunk_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"general-copy\0");
    hasher.update(chunk_id.as_bytes());
    digest_to_id(&hasher.finalize())
}

fn digest_to_id(digest: &[u8]) -> String {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// A query hit with its cosine distance (0 = same direction)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f64,
}

/// Rows written by an upsert.
///
/// `shared` and `namespace` count the caller's chunks; `general_copies`
/// counts replicas, each of which lands in both the shared and `general`
/// tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub shared: usize,
    pub namespace: usize,
    pub general_copies: usize,
}

impl UpsertSummary {
    pub fn merge(&mut self, other: UpsertSummary) {
        self.shared += other.shared;
        self.namespace += other.namespace;
        self.general_copies += other.general_copies;
    }
}

/// Rows removed by a scoped delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub shared: u64,
    pub namespace: u64,
}

impl DeleteSummary {
    pub fn is_empty(&self) -> bool {
        self.shared == 0 && self.namespace == 0
    }
}

/// Text of one chunk as produced by the document chunker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkText {
    pub chunk_index: i32,
    pub text: String,
}

impl ChunkText {
    pub fn new(chunk_index: i32, text: impl Into<String>) -> Self {
        Self {
            chunk_index,
            text: text.into(),
        }
    }
}

/// One document to ingest into one namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source: String,
    pub namespace: String,
    pub chunks: Vec<ChunkText>,
}

/// Pick the namespace for a request: explicit parameter, then header, then `general`
pub fn resolve_namespace(explicit: Option<&str>, header: Option<&str>) -> String {
    [explicit, header]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|ns| !ns.is_empty())
        .unwrap_or(GENERAL_NAMESPACE)
        .to_string()
}
