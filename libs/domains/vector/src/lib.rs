//! Vector Domain Library
//!
//! Namespace-partitioned chunk storage on Postgres + pgvector.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ IngestionService │  ← embed → upsert → completion notification
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐     ┌───────────────────┐
//! │  NamespaceStore  │     │ EmbeddingProvider │
//! │     (trait)      │     │      (trait)      │
//! └────────┬─────────┘     └───────────────────┘
//!          │
//! ┌────────▼─────────┐     ┌───────────────────┐
//! │ PgNamespaceStore │────▶│   SchemaManager   │  ← lazy, race-safe DDL
//! └──────────────────┘     └───────────────────┘
//! ```
//!
//! # Storage layout
//!
//! - `<schema>.embeddings`: every chunk of every namespace, filtered by the
//!   `namespace` column on every read and delete
//! - `<schema>.<sanitized namespace>`: one table per namespace, created on first write
//! - `<schema>.namespace_tables`: which raw namespace owns each sanitized table
//!
//! Chunks written under any namespace other than `general` are also copied,
//! under fresh ids, into `general` unless the namespace contains the exempt
//! marker. Deleting from a namespace never removes those copies.
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_vector::{Chunk, NamespaceStore, PgNamespaceStore, StoreConfig};
//!
//! # async fn example(db: sea_orm::DatabaseConnection) -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgNamespaceStore::new(db, StoreConfig::default());
//!
//! let chunk = Chunk::new("project-a", "doc-1", 0, "hello", vec![0.1; 768]);
//! let summary = store.upsert(vec![chunk], "project-a").await?;
//! assert_eq!(summary.general_copies, 1);
//!
//! let hits = store.query(&vec![0.1; 768], "project-a", 5, None).await?;
//! store.delete_by_source("doc-1", "project-a").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod sanitize;
pub mod schema;
pub mod service;

pub use config::StoreConfig;
pub use embedding::EmbeddingProvider;
pub use error::{
    EmbeddingError, IngestError, SchemaError, StoreError, StoreResult, WriteStage,
};
pub use memory::InMemoryNamespaceStore;
pub use models::{
    derive_chunk_id, resolve_namespace, Chunk, ChunkText, DeleteSummary, IngestRequest,
    ScoredChunk, UpsertSummary, GENERAL_NAMESPACE,
};
pub use postgres::PgNamespaceStore;
pub use repository::NamespaceStore;
pub use sanitize::{quote_ident, sanitize, TableName};
pub use schema::SchemaManager;
pub use service::IngestionService;
