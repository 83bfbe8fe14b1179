use std::sync::Arc;

use domain_notifications::{dispatch, Completion, CompletionNotifier};
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, IngestError};
use crate::models::{Chunk, IngestRequest, UpsertSummary};
use crate::repository::NamespaceStore;

/// Drives one document from chunk text to stored vectors, then reports the
/// outcome to the completion notifier.
pub struct IngestionService<S: NamespaceStore> {
    store: Arc<S>,
    embedder: Arc<dyn EmbeddingProvider>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl<S: NamespaceStore> IngestionService<S> {
    pub fn new(
        store: Arc<S>,
        embedder: Arc<dyn EmbeddingProvider>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            store,
            embedder,
            notifier,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Embed and store `request`.
    ///
    /// A notification goes out on a background task for both outcomes; its
    /// delivery never changes the returned result.
    pub async fn ingest(&self, request: IngestRequest) -> Result<UpsertSummary, IngestError> {
        let source = request.source.clone();
        let namespace = request.namespace.clone();

        let result = self.embed_and_store(request).await;

        let completion = match &result {
            Ok(summary) => {
                info!(
                    source = %source,
                    namespace = %namespace,
                    chunks = summary.shared,
                    general_copies = summary.general_copies,
                    "Ingestion completed"
                );
                Completion::success(&source, &namespace)
            }
            Err(e) => {
                warn!(source = %source, namespace = %namespace, error = %e, "Ingestion failed");
                Completion::failure(&source, &namespace, e.to_string())
            }
        };
        dispatch(self.notifier.clone(), completion);

        result
    }

    async fn embed_and_store(&self, request: IngestRequest) -> Result<UpsertSummary, IngestError> {
        validate(&request)?;

        let texts: Vec<String> = request.chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            ))
            .into());
        }

        let chunks: Vec<Chunk> = request
            .chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                Chunk::new(
                    &request.namespace,
                    &request.source,
                    chunk.chunk_index,
                    chunk.text,
                    embedding,
                )
            })
            .collect();

        Ok(self.store.upsert(chunks, &request.namespace).await?)
    }
}

fn validate(request: &IngestRequest) -> Result<(), IngestError> {
    if request.source.trim().is_empty() {
        return Err(IngestError::Validation("source must not be empty".to_string()));
    }
    if request.namespace.trim().is_empty() {
        return Err(IngestError::Validation(
            "namespace must not be empty".to_string(),
        ));
    }
    if request.chunks.is_empty() {
        return Err(IngestError::Validation(
            "document produced no chunks".to_string(),
        ));
    }
    if let Some(chunk) = request.chunks.iter().find(|c| c.text.trim().is_empty()) {
        return Err(IngestError::Validation(format!(
            "chunk {} has empty text",
            chunk.chunk_index
        )));
    }
    Ok(())
}
