//! The ingestion source boundary: one page of issues at a time, keyed by a
//! `{since, after}` cursor.

use async_trait::async_trait;
use github_issues::{GithubClient, GithubFetchError, IssuePage};
use time::OffsetDateTime;

use crate::domain::RepoKey;

/// Abstracts the remote issue API so the state machine can be exercised
/// without network access.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch_page(
        &self,
        key: &RepoKey,
        since: Option<OffsetDateTime>,
        after: Option<&str>,
        page_size: u32,
    ) -> Result<IssuePage, GithubFetchError>;
}

/// Production source backed by the GitHub GraphQL client.
#[derive(Clone)]
pub struct GithubIssueSource {
    client: GithubClient,
}

impl GithubIssueSource {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IssueSource for GithubIssueSource {
    async fn fetch_page(
        &self,
        key: &RepoKey,
        since: Option<OffsetDateTime>,
        after: Option<&str>,
        page_size: u32,
    ) -> Result<IssuePage, GithubFetchError> {
        self.client
            .fetch_issues_page(&key.owner, &key.name, since, after, page_size)
            .await
    }
}

#[cfg(test)]
pub use mock::MockIssueSource;
