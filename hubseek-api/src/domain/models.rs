//! Core entities shared by the sync state machine, the embedding pipeline and
//! the search engine.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use time::OffsetDateTime;

use super::RepoKey;

/// Lifecycle of the one-off initial load of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "init_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    NoIssues,
}

/// Lifecycle of the recurring incremental sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Ready,
    Queued,
    InProgress,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "embedding_sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSyncStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "issue_state", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueState {
    Open,
    Closed,
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueState::Open => write!(f, "OPEN"),
            IssueState::Closed => write!(f, "CLOSED"),
        }
    }
}

impl From<github_issues::IssueState> for IssueState {
    fn from(state: github_issues::IssueState) -> Self {
        match state {
            github_issues::IssueState::Open => IssueState::Open,
            github_issues::IssueState::Closed => IssueState::Closed,
        }
    }
}

/// Whether a pass belongs to the one-off initial load or the recurring cron
/// sync. Failure handling differs: init failures fail the repository, cron
/// failures are scoped to the affected issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Init,
    Cron,
}

/// Ingestion progress marker, persisted after every page.
///
/// `since` is the `updatedAt` watermark the current pagination was started
/// with; `after` is the opaque page cursor within that pagination. While
/// paginating, `since` stays fixed (the page cursor is only valid for the
/// query it came from) and `after` advances; once the final page lands,
/// `since` jumps to the newest `updatedAt` seen and `after` is cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(with = "time::serde::rfc3339")]
    pub since: OffsetDateTime,
    pub after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i32,
    pub owner: String,
    pub name: String,
    pub init_status: InitStatus,
    pub sync_status: SyncStatus,
    pub sync_cursor: Option<SyncCursor>,
    pub issues_last_updated_at: Option<OffsetDateTime>,
    pub last_synced_at: Option<OffsetDateTime>,
}

impl Repository {
    pub fn key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.name)
    }
}

/// The issue fields that make up the embedding input.
#[derive(Debug, Clone)]
pub struct IssueForEmbedding {
    pub id: i32,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub state_reason: Option<String>,
    pub author: Option<String>,
    pub labels: Vec<String>,
    pub issue_created_at: OffsetDateTime,
    pub issue_closed_at: Option<OffsetDateTime>,
}

/// A freshly generated vector waiting to be persisted.
#[derive(Debug, Clone)]
pub struct IssueEmbedding {
    pub issue_id: i32,
    pub vector: Vec<f32>,
}
