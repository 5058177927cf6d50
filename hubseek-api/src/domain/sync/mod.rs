//! The repository sync state machine: initial load and recurring
//! incremental sync, with per-page durable checkpoints.

mod repo_sync;
mod source;
mod worker;

pub use repo_sync::{RepoSyncService, SyncConfig, SyncError, SyncStats};
pub use source::{GithubIssueSource, IssueSource};
#[cfg(test)]
pub use source::MockIssueSource;
pub use worker::{run_issue_sync_worker, run_maintenance_worker};
