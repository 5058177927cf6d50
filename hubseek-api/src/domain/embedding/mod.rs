//! Embedding generation: provider abstraction and the batched pipeline that
//! keeps issue vectors in sync with issue text.

mod pipeline;
mod traits;
mod worker;

pub mod embedder;

pub use pipeline::{format_issue_for_embedding, EmbeddingConfig, EmbeddingPipeline, EmbeddingStats};
pub use traits::{Embedder, EmbeddingError, IssueEmbedder};
pub use worker::run_embedding_sync_worker;
