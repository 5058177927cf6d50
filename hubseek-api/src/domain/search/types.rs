//! Core types for the search domain.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::IssueState;

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    /// "I'm feeling lucky": short-circuit to the single top result.
    pub lucky: bool,
    /// Restrict to these repositories (the caller's visible set). `None`
    /// searches everything that finished its initial load.
    pub repo_ids: Option<Vec<i32>>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: 1,
            page_size: 30,
            lucky: false,
            repo_ids: None,
        }
    }
}

/// `state:` filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Open,
    Closed,
    All,
}

/// The structured filters extracted from a query, plus the free text left
/// over for the embedding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    /// Bare quoted strings: substring match on title or body.
    pub substring_queries: Vec<String>,
    pub title_queries: Vec<String>,
    pub body_queries: Vec<String>,
    pub author_queries: Vec<String>,
    pub label_queries: Vec<String>,
    pub repo_queries: Vec<String>,
    pub owner_queries: Vec<String>,
    pub state_queries: Vec<StateFilter>,
    /// Query text with the operators stripped; `None` when nothing remains.
    pub remaining_query: Option<String>,
}

/// A similarity-ranked candidate as returned by the index, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandidateIssue {
    pub id: i32,
    pub number: i64,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub state: IssueState,
    pub state_reason: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    pub comment_count: i64,
    pub labels: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub issue_closed_at: Option<OffsetDateTime>,
    /// Cosine distance to the query embedding.
    pub distance: f64,
}

/// A scored result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedIssue {
    pub id: i32,
    pub number: i64,
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub state: IssueState,
    pub state_reason: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    pub comment_count: i64,
    pub labels: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub issue_closed_at: Option<OffsetDateTime>,
    /// Anchor-normalized similarity in [0, 1].
    pub similarity: f64,
    /// Composite ranking score.
    pub score: f64,
}

/// One page of score-ordered results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<RankedIssue>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

impl SearchPage {
    pub fn empty(page: u32, page_size: u32) -> Self {
        Self {
            results: vec![],
            total_count: 0,
            page,
            page_size,
        }
    }
}
