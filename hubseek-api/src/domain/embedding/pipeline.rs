//! The batched embedding pipeline: drains stale issues through the rate
//! limiter and persists the resulting vectors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::domain::{
    retry_with_backoff, EmbeddingSyncStatus, IssueEmbedding, IssueForEmbedding, RateLimiter,
    RetryPolicy, SyncMode,
};
use crate::repositories::IssueRepository;

use super::traits::{Embedder, EmbeddingError, IssueEmbedder, Result};

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Issues per provider request.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Request budget for the embedding resource.
    pub requests_per_minute: u32,
    pub retry_policy: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 3,
            requests_per_minute: 3000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingStats {
    pub embedded: usize,
    pub failed: usize,
}

impl EmbeddingStats {
    fn merge(self, other: EmbeddingStats) -> Self {
        Self {
            embedded: self.embedded + other.embedded,
            failed: self.failed + other.failed,
        }
    }
}

/// Pipeline that turns stale issues into persisted vectors.
///
/// # Type Parameters
///
/// * `E` - Embedder implementation for the provider call
/// * `I` - IssueRepository implementation for persistence
pub struct EmbeddingPipeline<E, I>
where
    E: Embedder,
    I: IssueRepository,
{
    embedder: E,
    issues: I,
    rate_limiter: Arc<RateLimiter>,
    config: EmbeddingConfig,
}

impl<E, I> EmbeddingPipeline<E, I>
where
    E: Embedder,
    I: IssueRepository,
{
    pub fn new(
        embedder: E,
        issues: I,
        rate_limiter: Arc<RateLimiter>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            embedder,
            issues,
            rate_limiter,
            config,
        }
    }

    /// Cron entry point: select every issue whose embedding is missing,
    /// errored out of a previous pass, or generated under a superseded model,
    /// and re-embed them. Per-batch failures mark only the affected issues.
    pub async fn run_cron_embedding_sync(&self) -> Result<EmbeddingStats> {
        let issue_ids = self.issues.outdated_issue_ids(self.embedder.model()).await?;
        if issue_ids.is_empty() {
            return Ok(EmbeddingStats::default());
        }

        info!(issues = issue_ids.len(), "Embedding outdated issues");
        self.process(&issue_ids, SyncMode::Cron).await
    }

    /// Re-queue issues stuck in a non-terminal embedding state, so crashes
    /// mid-batch recover on a later pass.
    pub async fn requeue_stuck(&self, threshold: time::Duration) -> Result<u64> {
        Ok(self.issues.requeue_stuck(threshold).await?)
    }

    async fn process(&self, issue_ids: &[i32], mode: SyncMode) -> Result<EmbeddingStats> {
        let batches: Vec<Vec<i32>> = issue_ids
            .chunks(self.config.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let mut in_flight = stream::iter(
            batches
                .into_iter()
                .map(|batch| self.process_batch(batch, mode)),
        )
        .buffer_unordered(self.config.concurrency);

        let mut stats = EmbeddingStats::default();
        while let Some(result) = in_flight.next().await {
            stats = stats.merge(result?);
        }

        Ok(stats)
    }

    async fn process_batch(&self, issue_ids: Vec<i32>, mode: SyncMode) -> Result<EmbeddingStats> {
        let selected = self.issues.select_for_embedding(&issue_ids).await?;
        if selected.is_empty() {
            return Ok(EmbeddingStats::default());
        }

        match self.embed_and_store(&selected).await {
            Ok(stats) => Ok(stats),
            // Persistence failures are fatal to the run in either mode.
            Err(EmbeddingError::Database(e)) => Err(EmbeddingError::Database(e)),
            Err(err) => match mode {
                // Initial embedding is required before the repository becomes
                // searchable; let the sync state machine fail the repo.
                SyncMode::Init => Err(err),
                // A failed batch must not block unrelated issues.
                SyncMode::Cron => {
                    warn!(error = %err, issues = issue_ids.len(), "Embedding batch failed");
                    self.issues
                        .mark_embedding_status(&issue_ids, EmbeddingSyncStatus::Error)
                        .await?;
                    Ok(EmbeddingStats {
                        embedded: 0,
                        failed: issue_ids.len(),
                    })
                }
            },
        }
    }

    /// Embed one batch and upsert the vectors. A "reduce your prompt"
    /// rejection halves the batch and retries both halves; a single issue
    /// that is still too large is marked errored instead of failing the run.
    fn embed_and_store<'a>(
        &'a self,
        selected: &'a [IssueForEmbedding],
    ) -> BoxFuture<'a, Result<EmbeddingStats>> {
        Box::pin(async move {
            self.wait_for_budget().await;

            let texts: Vec<String> = selected.iter().map(format_issue_for_embedding).collect();
            let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            let outcome = retry_with_backoff(
                &self.config.retry_policy,
                || self.embedder.embed_batch(&text_refs),
                |err| matches!(err, EmbeddingError::Provider(_) | EmbeddingError::Timeout),
                || EmbeddingError::Timeout,
            )
            .await;

            match outcome {
                Ok(vectors) => {
                    let embeddings: Vec<IssueEmbedding> = selected
                        .iter()
                        .zip(vectors)
                        .map(|(issue, vector)| IssueEmbedding {
                            issue_id: issue.id,
                            vector,
                        })
                        .collect();
                    self.issues
                        .store_embeddings(&embeddings, self.embedder.model())
                        .await?;
                    Ok(EmbeddingStats {
                        embedded: embeddings.len(),
                        failed: 0,
                    })
                }
                Err(EmbeddingError::PromptTooLarge(_)) if selected.len() > 1 => {
                    let mid = selected.len() / 2;
                    warn!(
                        batch = selected.len(),
                        "Provider rejected batch as too large, splitting"
                    );
                    let left = self.embed_and_store(&selected[..mid]).await?;
                    let right = self.embed_and_store(&selected[mid..]).await?;
                    Ok(left.merge(right))
                }
                Err(EmbeddingError::PromptTooLarge(message)) => {
                    warn!(
                        issue_id = selected[0].id,
                        error = %message,
                        "Single issue exceeds the provider input limit"
                    );
                    self.issues
                        .mark_embedding_status(&[selected[0].id], EmbeddingSyncStatus::Error)
                        .await?;
                    Ok(EmbeddingStats {
                        embedded: 0,
                        failed: 1,
                    })
                }
                Err(err) => Err(err),
            }
        })
    }

    async fn wait_for_budget(&self) {
        loop {
            let wait = self
                .rate_limiter
                .reserve(self.embedder.model(), self.config.requests_per_minute)
                .await;
            if wait == Duration::ZERO {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl<E, I> IssueEmbedder for EmbeddingPipeline<E, I>
where
    E: Embedder,
    I: IssueRepository,
{
    async fn embed_issues(&self, issue_ids: &[i32], mode: SyncMode) -> Result<EmbeddingStats> {
        if issue_ids.is_empty() {
            return Ok(EmbeddingStats::default());
        }
        self.process(issue_ids, mode).await
    }
}

/// The text the provider sees for one issue: title and body first, then the
/// metadata fields users plausibly include in a query.
pub fn format_issue_for_embedding(issue: &IssueForEmbedding) -> String {
    let mut text = format!(
        "Issue #{}: {}\nBody: {}\n",
        issue.number, issue.title, issue.body
    );

    if !issue.labels.is_empty() {
        text.push_str(&format!("Labels: {}\n", issue.labels.join(", ")));
    }
    text.push_str(&format!("State: {}\n", issue.state));
    if let Some(reason) = &issue.state_reason {
        text.push_str(&format!("State Reason: {reason}\n"));
    }
    if let Some(author) = &issue.author {
        text.push_str(&format!("Author: {author}\n"));
    }
    if let Ok(created) = issue.issue_created_at.format(&Rfc3339) {
        text.push_str(&format!("Created At: {created}\n"));
    }
    if let Some(closed_at) = issue.issue_closed_at {
        if let Ok(closed) = closed_at.format(&Rfc3339) {
            text.push_str(&format!("Closed At: {closed}\n"));
        }
    }

    text
}
