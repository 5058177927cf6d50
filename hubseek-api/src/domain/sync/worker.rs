//! Background workers driving the sync cadences.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::domain::embedding::IssueEmbedder;
use crate::repositories::{IssueRepository, RepoRepository};

use super::repo_sync::RepoSyncService;
use super::source::IssueSource;

/// Runs initial loads for newly subscribed repositories and the incremental
/// cron sync, on a fixed cadence.
pub async fn run_issue_sync_worker<S, R, I, P>(
    service: Arc<RepoSyncService<S, R, I, P>>,
    interval: Duration,
) where
    S: IssueSource,
    R: RepoRepository,
    I: IssueRepository,
    P: IssueEmbedder,
{
    info!(
        interval_secs = interval.as_secs(),
        "Issue sync worker started"
    );

    let mut ticker = tokio::time::interval(interval);

    // Skip the first immediate tick to let the app fully start
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // Initial loads first: a repository is not searchable before its
        // init pass completes.
        loop {
            match service.run_pending_init().await {
                Ok(Some(repo_id)) => {
                    info!(repo_id, "Initial sync finished");
                }
                Ok(None) => break,
                Err(e) => {
                    // The repository is already marked errored; stop the
                    // init drain for this tick so a persistent failure
                    // can't spin the loop.
                    error!(error = %e, "Initial sync failed");
                    break;
                }
            }
        }

        if let Err(e) = service.run_cron_sync().await {
            error!(error = %e, "Cron sync pass failed");
        }
    }
}

/// Periodically resets repositories wedged `in_progress` and issues stuck in
/// a non-terminal embedding state, so crashes self-heal.
pub async fn run_maintenance_worker<R, I>(
    repos: R,
    issues: I,
    interval: Duration,
    staleness: time::Duration,
) where
    R: RepoRepository,
    I: IssueRepository,
{
    info!(
        interval_secs = interval.as_secs(),
        "Maintenance worker started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match repos.unstuck_stale(staleness).await {
            Ok(0) => {}
            Ok(reset) => info!(reset, "Reset stuck repositories"),
            Err(e) => error!(error = %e, "Failed to reset stuck repositories"),
        }

        match issues.requeue_stuck(staleness).await {
            Ok(0) => {}
            Ok(moved) => info!(moved, "Re-queued stuck issue embeddings"),
            Err(e) => error!(error = %e, "Failed to re-queue stuck issues"),
        }
    }
}
