//! Trait definitions for the embedding boundary.

use async_trait::async_trait;

use crate::domain::SyncMode;
use crate::repositories::RepositoryError;

use super::pipeline::EmbeddingStats;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The provider rejected the request because the input is too long.
    /// Recoverable by splitting the batch, never fatal for a repository.
    #[error("Embedding input too large: {0}")]
    PromptTooLarge(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding request timed out")]
    Timeout,
}

impl From<RepositoryError> for EmbeddingError {
    fn from(e: RepositoryError) -> Self {
        EmbeddingError::Database(e.to_string())
    }
}

impl EmbeddingError {
    /// Classify a raw provider error message. The "reduce your prompt" class
    /// is only recognizable by message content.
    pub fn from_provider_message(message: String) -> Self {
        if message.to_lowercase().contains("reduce your prompt") {
            EmbeddingError::PromptTooLarge(message)
        } else {
            EmbeddingError::Provider(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Text embedding generation, abstracted over the provider for testing.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in one request.
    ///
    /// Default implementation calls `embed` sequentially; implementations
    /// should override with a real batch call.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The active model version tag stored alongside every vector.
    fn model(&self) -> &str;

    /// Embedding dimensions for this model.
    fn dimensions(&self) -> usize;
}

/// The slice of the pipeline the sync state machine depends on: embed a
/// known set of issues in the semantics of the given mode.
#[async_trait]
pub trait IssueEmbedder: Send + Sync {
    async fn embed_issues(&self, issue_ids: &[i32], mode: SyncMode) -> Result<EmbeddingStats>;
}
