//! Trait definitions for the search boundary.

use async_trait::async_trait;

use crate::domain::embedding::EmbeddingError;

use super::types::{CandidateIssue, ParsedQuery};

/// Error type for search operations.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for SearchError {
    fn from(e: sqlx::Error) -> Self {
        SearchError::DatabaseError(e.to_string())
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(e: EmbeddingError) -> Self {
        SearchError::EmbeddingError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

/// Similarity retrieval over the persisted vector column.
///
/// Both query modes answer the same question - top-k issues by cosine
/// distance, restricted to the filters and the caller's repository scope -
/// and differ only in how the index is scanned. The strategy choice is a
/// performance decision and must not change ranking semantics.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Number of indexed issues matching the filters; drives the
    /// exact-vs-approximate strategy choice.
    async fn count_filtered(
        &self,
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
    ) -> Result<i64>;

    /// Exact scan: filters applied before the vector comparison, every
    /// matching row considered.
    async fn exact_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>>;

    /// Approximate scan through the HNSW index with bounded scan parameters,
    /// filters applied to the retrieved neighborhood.
    async fn approximate_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>>;
}
