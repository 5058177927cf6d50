//! Semantic search over mirrored issues.
//!
//! The engine blends vector similarity with metadata signals:
//!
//! - **Candidate retrieval** via pgvector cosine distance, switching between
//!   an exact scan and a bounded HNSW scan based on corpus size
//! - **Composite scoring** from similarity, comment activity, recency and
//!   issue state
//! - **A small structured-filter grammar** (`label:"bug" state:open ...`)
//!   layered over the free-text query
//!
//! The pieces are trait-separated for testability:
//!
//! - [`Embedder`] - query embedding generation
//! - [`SearchIndex`] - similarity retrieval over persisted vectors

mod parser;
mod ranking;
mod service;
mod traits;
mod types;

pub mod repository;

pub use parser::parse_query;
pub use ranking::{
    comment_score, ranking_score, recency_score, similarity_score, state_score, RankingWeights,
    COMMENT_COUNT_CAP, NORMALIZATION_ANCHOR, RANKING_WEIGHTS, RECENCY_BASE_DAYS,
};
pub use service::{SearchConfig, SearchService, SearchStrategy};
pub use traits::{SearchError, SearchIndex};
pub use types::{CandidateIssue, ParsedQuery, RankedIssue, SearchPage, SearchParams, StateFilter};
