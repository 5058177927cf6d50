use serde_json::json;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::models::{FetchedIssue, GraphqlResponse, IssuePage};
use crate::query::ISSUES_WITH_COMMENTS_LABELS_QUERY;

const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default page size; GitHub's maximum for the issues connection.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GithubFetchError {
    #[error("Request to GitHub failed: {0}")]
    Http(String),
    #[error("Unauthorized, check the access token")]
    Unauthorized,
    #[error("GitHub API returned an error: {0}")]
    Api(String),
    #[error("Repository {owner}/{name} not found")]
    RepositoryNotFound { owner: String, name: String },
    #[error("Failed to parse GitHub response: {0}")]
    Parsing(String),
}

/// Client for GitHub's GraphQL issues API.
///
/// One page per call: pagination state (`since`/`after`) is owned by the
/// caller so interrupted syncs can resume from a persisted cursor.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl GithubClient {
    pub fn new(token: impl Into<String>) -> Result<Self, GithubFetchError> {
        Self::with_endpoint(token, GITHUB_GRAPHQL_URL)
    }

    /// Point the client at a different endpoint (tests, GitHub Enterprise).
    pub fn with_endpoint(
        token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, GithubFetchError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("hubseek")
            .build()
            .map_err(|e| GithubFetchError::Http(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
        })
    }

    /// Fetch one page of issues (with nested comments and labels) for
    /// `owner/name`, ordered by `updatedAt` ascending.
    ///
    /// `since` restricts the result to issues updated at or after the given
    /// time; `after` resumes from an opaque page cursor. Bodies are already
    /// truncated in the returned page.
    #[tracing::instrument(skip(self), fields(repo = %format!("{owner}/{name}")))]
    pub async fn fetch_issues_page(
        &self,
        owner: &str,
        name: &str,
        since: Option<OffsetDateTime>,
        after: Option<&str>,
        page_size: u32,
    ) -> Result<IssuePage, GithubFetchError> {
        let since_str = since
            .map(|t| t.format(&Rfc3339))
            .transpose()
            .map_err(|e| GithubFetchError::Parsing(e.to_string()))?;

        let body = json!({
            "query": ISSUES_WITH_COMMENTS_LABELS_QUERY,
            "variables": {
                "owner": owner,
                "repo": name,
                "since": since_str,
                "cursor": after,
                "first": page_size.min(MAX_PAGE_SIZE),
            },
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GithubFetchError::Http(e.to_string()))?;

        if resp.status() == 401 || resp.status() == 403 {
            return Err(GithubFetchError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(GithubFetchError::Api(format!(
                "status {}",
                resp.status()
            )));
        }

        let parsed = resp
            .json::<GraphqlResponse>()
            .await
            .map_err(|e| GithubFetchError::Parsing(e.to_string()))?;

        if let Some(errors) = parsed.errors {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(GithubFetchError::Api(messages.join("; ")));
        }

        let repository = parsed
            .data
            .ok_or_else(|| GithubFetchError::Parsing("missing data field".into()))?
            .repository
            .ok_or_else(|| GithubFetchError::RepositoryNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;

        let page_info = repository.issues.page_info;
        let issues: Vec<FetchedIssue> = repository
            .issues
            .nodes
            .into_iter()
            .map(FetchedIssue::from)
            .collect();

        tracing::debug!(
            issues = issues.len(),
            has_next_page = page_info.has_next_page,
            "Fetched issue page"
        );

        Ok(IssuePage { issues, page_info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_response_with_errors_parses() {
        let raw = r#"{"data": null, "errors": [{"message": "rate limited"}]}"#;
        let parsed: GraphqlResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.errors.unwrap()[0].message, "rate limited");
    }

    #[test]
    fn full_page_response_parses() {
        let raw = r#"{
            "data": {
                "repository": {
                    "issues": {
                        "nodes": [],
                        "pageInfo": { "hasNextPage": false, "endCursor": null }
                    }
                }
            }
        }"#;
        let parsed: GraphqlResponse = serde_json::from_str(raw).unwrap();
        let repo = parsed.data.unwrap().repository.unwrap();
        assert!(!repo.issues.page_info.has_next_page);
        assert!(repo.issues.page_info.end_cursor.is_none());
    }

    #[test]
    fn missing_repository_means_not_found() {
        let raw = r#"{"data": {"repository": null}}"#;
        let parsed: GraphqlResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.data.unwrap().repository.is_none());
    }
}
