use serde::Deserialize;
use time::OffsetDateTime;

use crate::truncate::{truncate_code_blocks, truncate_to_byte_size};

/// Issue and comment bodies are truncated before leaving the client: fenced
/// code blocks collapse to a head/tail preview, then the whole body is capped
/// at a byte ceiling.
pub const MAX_BODY_SIZE_BYTES: usize = 5 * 1024;
pub const CODE_BLOCK_PREVIEW_LINES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStateReason {
    Completed,
    Reopened,
    NotPlanned,
    Duplicate,
}

impl IssueStateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStateReason::Completed => "COMPLETED",
            IssueStateReason::Reopened => "REOPENED",
            IssueStateReason::NotPlanned => "NOT_PLANNED",
            IssueStateReason::Duplicate => "DUPLICATE",
        }
    }
}

/// Page marker returned alongside every issue page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// One page of issues with nested comments and labels, bodies already
/// truncated.
#[derive(Debug, Clone)]
pub struct IssuePage {
    pub issues: Vec<FetchedIssue>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone)]
pub struct FetchedIssue {
    /// GitHub node id, stable across renames.
    pub github_id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: IssueState,
    pub state_reason: Option<IssueStateReason>,
    /// Login of the author; `None` for deleted users.
    pub author: Option<String>,
    /// Total comment count as reported by GitHub (only the first 100 are
    /// mirrored).
    pub comment_count: i64,
    pub labels: Vec<FetchedLabel>,
    pub comments: Vec<FetchedComment>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub closed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct FetchedLabel {
    pub github_id: String,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedComment {
    pub github_id: String,
    pub author: Option<String>,
    pub body: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// Wire types mirroring the GraphQL response shape.

#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlResponse {
    pub data: Option<ResponseData>,
    pub errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseData {
    pub repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryNode {
    pub issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueConnection {
    pub nodes: Vec<IssueNode>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueNode {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub state: IssueState,
    pub state_reason: Option<IssueStateReason>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    pub author: Option<ActorNode>,
    pub labels: LabelConnection,
    pub comments: CommentConnection,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActorNode {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelConnection {
    pub nodes: Vec<LabelNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelNode {
    pub id: String,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentConnection {
    pub total_count: i64,
    pub nodes: Vec<CommentNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentNode {
    pub id: String,
    pub author: Option<ActorNode>,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn truncate_body(body: &str) -> String {
    truncate_to_byte_size(
        &truncate_code_blocks(body, CODE_BLOCK_PREVIEW_LINES),
        MAX_BODY_SIZE_BYTES,
    )
}

impl From<IssueNode> for FetchedIssue {
    fn from(node: IssueNode) -> Self {
        FetchedIssue {
            github_id: node.id,
            number: node.number,
            title: node.title,
            body: truncate_body(node.body.as_deref().unwrap_or_default()),
            url: node.url,
            state: node.state,
            state_reason: node.state_reason,
            author: node.author.map(|a| a.login),
            comment_count: node.comments.total_count,
            labels: node
                .labels
                .nodes
                .into_iter()
                .map(|label| FetchedLabel {
                    github_id: label.id,
                    name: label.name,
                    color: label.color,
                    description: label.description,
                })
                .collect(),
            comments: node
                .comments
                .nodes
                .into_iter()
                .map(|comment| FetchedComment {
                    github_id: comment.id,
                    author: comment.author.map(|a| a.login),
                    body: truncate_body(&comment.body),
                    created_at: comment.created_at,
                    updated_at: comment.updated_at,
                })
                .collect(),
            created_at: node.created_at,
            updated_at: node.updated_at,
            closed_at: node.closed_at,
        }
    }
}
