//! In-memory similarity index for service-level tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::domain::search::traits::{Result, SearchIndex};
use crate::domain::search::types::{CandidateIssue, ParsedQuery, StateFilter};
use crate::domain::IssueState;

/// A stored document: candidate metadata plus the vector it was indexed
/// under and the fields filters need.
#[derive(Debug, Clone)]
pub struct MockIssueDoc {
    pub candidate: CandidateIssue,
    pub repo_id: i32,
    pub body: String,
    pub embedding: Vec<f32>,
}

pub fn make_doc(id: i32, title: &str, embedding: Vec<f32>) -> MockIssueDoc {
    let now = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
    MockIssueDoc {
        candidate: CandidateIssue {
            id,
            number: id as i64,
            title: title.to_string(),
            url: format!("https://github.com/acme/widget/issues/{id}"),
            author: Some("octocat".to_string()),
            state: IssueState::Open,
            state_reason: None,
            repo_owner: "acme".to_string(),
            repo_name: "widget".to_string(),
            comment_count: 0,
            labels: vec![],
            issue_created_at: now,
            issue_updated_at: now,
            issue_closed_at: None,
            distance: 0.0,
        },
        repo_id: 1,
        body: String::new(),
        embedding,
    }
}

/// Mock index computing real cosine distances over in-memory docs, with call
/// counters per strategy and an overridable corpus count.
#[derive(Clone, Default)]
pub struct MockSearchIndex {
    docs: Arc<RwLock<Vec<MockIssueDoc>>>,
    reported_count: Arc<Mutex<Option<i64>>>,
    exact_calls: Arc<AtomicUsize>,
    approximate_calls: Arc<AtomicUsize>,
}

impl MockSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docs(self, docs: Vec<MockIssueDoc>) -> Self {
        *self.docs.write().unwrap() = docs;
        self
    }

    /// Override the count returned by `count_filtered` (to exercise the
    /// strategy switch without a 25k-document fixture).
    pub fn report_count(&self, count: i64) {
        *self.reported_count.lock().unwrap() = Some(count);
    }

    pub fn exact_calls(&self) -> usize {
        self.exact_calls.load(Ordering::SeqCst)
    }

    pub fn approximate_calls(&self) -> usize {
        self.approximate_calls.load(Ordering::SeqCst)
    }

    fn matching_docs(
        &self,
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
    ) -> Vec<MockIssueDoc> {
        let docs = self.docs.read().unwrap();
        docs.iter()
            .filter(|doc| doc_matches(doc, query, repo_scope))
            .cloned()
            .collect()
    }

    fn ranked(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Vec<CandidateIssue> {
        let mut candidates: Vec<CandidateIssue> = self
            .matching_docs(query, repo_scope)
            .into_iter()
            .map(|doc| {
                let mut candidate = doc.candidate.clone();
                candidate.distance = cosine_distance(embedding, &doc.embedding);
                candidate
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        candidates.truncate(k);
        candidates
    }
}

fn doc_matches(doc: &MockIssueDoc, query: &ParsedQuery, repo_scope: Option<&[i32]>) -> bool {
    if let Some(scope) = repo_scope {
        if !scope.contains(&doc.repo_id) {
            return false;
        }
    }

    let candidate = &doc.candidate;
    let contains = |haystack: &str, needle: &str| {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    };

    if !query
        .substring_queries
        .iter()
        .all(|q| contains(&candidate.title, q) || contains(&doc.body, q))
    {
        return false;
    }
    if !query.title_queries.iter().all(|q| contains(&candidate.title, q)) {
        return false;
    }
    if !query.body_queries.iter().all(|q| contains(&doc.body, q)) {
        return false;
    }
    if !query.author_queries.iter().all(|q| {
        candidate
            .author
            .as_deref()
            .map(|author| author.eq_ignore_ascii_case(q))
            .unwrap_or(false)
    }) {
        return false;
    }
    if !query.label_queries.iter().all(|q| {
        candidate
            .labels
            .iter()
            .any(|label| label.eq_ignore_ascii_case(q))
    }) {
        return false;
    }
    if !query
        .repo_queries
        .iter()
        .all(|q| candidate.repo_name.eq_ignore_ascii_case(q))
    {
        return false;
    }
    if !query
        .owner_queries
        .iter()
        .all(|q| candidate.repo_owner.eq_ignore_ascii_case(q))
    {
        return false;
    }

    if !query.state_queries.is_empty() && !query.state_queries.contains(&StateFilter::All) {
        let wanted_open = query.state_queries.contains(&StateFilter::Open);
        let wanted_closed = query.state_queries.contains(&StateFilter::Closed);
        match candidate.state {
            IssueState::Open if !wanted_open => return false,
            IssueState::Closed if !wanted_closed => return false,
            _ => {}
        }
    }

    true
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl SearchIndex for MockSearchIndex {
    async fn count_filtered(
        &self,
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
    ) -> Result<i64> {
        if let Some(count) = *self.reported_count.lock().unwrap() {
            return Ok(count);
        }
        Ok(self.matching_docs(query, repo_scope).len() as i64)
    }

    async fn exact_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>> {
        self.exact_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ranked(embedding, query, repo_scope, k))
    }

    async fn approximate_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>> {
        self.approximate_calls.fetch_add(1, Ordering::SeqCst);
        // Same ranking contract as the exact path; only the scan differs in
        // production.
        Ok(self.ranked(embedding, query, repo_scope, k))
    }
}
