use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Maps text to fixed-dimension vectors.
///
/// Backends (hosted APIs, local models) live outside this crate; failures such
/// as rate limits or context-length violations come back as `EmbeddingError`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// One vector per input text, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
