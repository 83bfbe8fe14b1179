use std::fmt;

use thiserror::Error;

use crate::models::UpsertSummary;

/// Table or index creation failures
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to create {object}: {message}")]
    Create { object: String, message: String },

    #[error("Namespace '{requested}' maps to table '{table}', which belongs to namespace '{owner}'")]
    NamespaceConflict {
        requested: String,
        table: String,
        owner: String,
    },

    #[error("Namespace '{namespace}' maps to reserved table name '{table}'")]
    ReservedName { namespace: String, table: String },

    #[error("Relation {table} already exists as a {kind}, not a table")]
    NotATable { table: String, kind: String },

    #[error("Table '{table}' stores vectors of dimension {found}, expected {expected}")]
    DimensionMismatch {
        table: String,
        expected: usize,
        found: usize,
    },
}

/// Step of a batch write that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    SharedTable,
    NamespaceTable,
    GeneralCopyShared,
    GeneralCopyTable,
    Commit,
}

impl WriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::SharedTable => "shared_table",
            WriteStage::NamespaceTable => "namespace_table",
            WriteStage::GeneralCopyShared => "general_copy_shared",
            WriteStage::GeneralCopyTable => "general_copy_table",
            WriteStage::Commit => "commit",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Rejected before any I/O
    #[error("Invalid input: {0}")]
    Precondition(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Batches before the failing one stay committed and are counted in `committed`
    #[error(
        "Write failed at {stage} after committing {} of {attempted} chunks: {message}",
        .committed.shared
    )]
    Write {
        stage: WriteStage,
        committed: UpsertSummary,
        attempted: usize,
        message: String,
    },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Delete failed: {0}")]
    Delete(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by an embedding backend
#[derive(Debug, Error)]
#[error("Embedding error: {0}")]
pub struct EmbeddingError(pub String);

/// Failure of one ingestion attempt, as reported to the completion callback
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_reports_committed_and_attempted() {
        let err = StoreError::Write {
            stage: WriteStage::NamespaceTable,
            committed: UpsertSummary {
                shared: 100,
                namespace: 100,
                general_copies: 100,
            },
            attempted: 250,
            message: "connection reset".to_string(),
        };

        let text = err.to_string();
        assert!(text.contains("namespace_table"));
        assert!(text.contains("100 of 250"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn test_schema_error_converts_into_store_error() {
        let err: StoreError = SchemaError::ReservedName {
            namespace: "Embeddings".to_string(),
            table: "embeddings".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Schema(SchemaError::ReservedName { .. })));
    }
}
