//! Background worker for the hourly embedding sync.

use std::time::Duration;

use tracing::{error, info};

use crate::repositories::IssueRepository;

use super::pipeline::EmbeddingPipeline;
use super::traits::Embedder;

/// Runs the cron embedding pass on a fixed cadence. Errors are logged and
/// the next tick runs regardless.
pub async fn run_embedding_sync_worker<E, I>(
    pipeline: EmbeddingPipeline<E, I>,
    interval: Duration,
) where
    E: Embedder,
    I: IssueRepository,
{
    info!(
        interval_secs = interval.as_secs(),
        "Embedding sync worker started"
    );

    let mut ticker = tokio::time::interval(interval);

    // Skip the first immediate tick to let the app fully start
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match pipeline.run_cron_embedding_sync().await {
            Ok(stats) => {
                info!(
                    embedded = stats.embedded,
                    failed = stats.failed,
                    "Embedding sync cycle completed"
                );
            }
            Err(e) => {
                error!(error = %e, "Embedding sync cycle failed");
            }
        }
    }
}
