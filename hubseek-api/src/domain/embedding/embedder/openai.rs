//! OpenAI embedder implementation using the genai crate.

use async_trait::async_trait;
use genai::embed::EmbedOptions;

use crate::domain::embedding::traits::{Embedder, EmbeddingError, Result};

/// OpenAI embedding model configuration.
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Embedder implementation using OpenAI's batch embedding API via the
/// `genai` crate.
///
/// The genai client automatically reads `OPENAI_API_KEY` from the
/// environment.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: genai::Client,
    model: String,
    options: EmbedOptions,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder with the default model.
    pub fn new() -> Result<Self> {
        Self::with_model(EMBEDDING_MODEL)
    }

    /// Create a new embedder with a specific model.
    pub fn with_model(model: impl Into<String>) -> Result<Self> {
        let client = genai::Client::default();
        let options = EmbedOptions::new().with_dimensions(EMBEDDING_DIMENSIONS);

        Ok(Self {
            client,
            model: model.into(),
            options,
        })
    }

    /// Try to create from environment variable.
    ///
    /// Returns `None` if `OPENAI_API_KEY` is not set, or `Some(Err)` if the
    /// client can't be created for another reason.
    pub fn try_from_env() -> Option<Result<Self>> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return None;
        }
        Some(Self::new())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(vec![0.0; EMBEDDING_DIMENSIONS]);
        }

        let response = self
            .client
            .embed(&self.model, text, Some(&self.options))
            .await
            .map_err(|e| EmbeddingError::from_provider_message(e.to_string()))?;

        let embedding = response
            .first_embedding()
            .ok_or_else(|| EmbeddingError::Provider("No embedding in response".into()))?;

        Ok(embedding.vector().to_vec())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Filter empty strings and track their indices
        let mut results = vec![vec![0.0f32; EMBEDDING_DIMENSIONS]; texts.len()];
        let non_empty: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(i, t)| (i, t.to_string()))
            .collect();

        if non_empty.is_empty() {
            return Ok(results);
        }

        let batch_texts: Vec<String> = non_empty.iter().map(|(_, t)| t.clone()).collect();

        let response = self
            .client
            .embed_batch(&self.model, batch_texts, Some(&self.options))
            .await
            .map_err(|e| EmbeddingError::from_provider_message(e.to_string()))?;

        for (batch_idx, (original_idx, _)) in non_empty.iter().enumerate() {
            if let Some(embedding) = response.embeddings.get(batch_idx) {
                results[*original_idx] = embedding.vector().to_vec();
            }
        }

        Ok(results)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_empty_returns_zeros() {
        if std::env::var("OPENAI_API_KEY").is_err() {
            // Can't test without API key
            return;
        }
        let embedder = OpenAiEmbedder::new().unwrap();
        let result = embedder.embed("").await.unwrap();
        assert_eq!(result.len(), EMBEDDING_DIMENSIONS);
        assert!(result.iter().all(|&x| x == 0.0));
    }
}
