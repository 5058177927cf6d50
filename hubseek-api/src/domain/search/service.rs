//! Search service: query embedding, adaptive strategy choice, scoring and
//! pagination.

use time::OffsetDateTime;
use tracing::debug;

use crate::domain::embedding::Embedder;

use super::parser::parse_query;
use super::ranking::{ranking_score, similarity_score};
use super::traits::{Result, SearchIndex};
use super::types::{CandidateIssue, RankedIssue, SearchPage, SearchParams};

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Size of the similarity-ranked candidate set.
    pub vector_search_limit: usize,
    /// At or above this many matching issues the approximate index takes
    /// over from the exact scan.
    pub approx_index_threshold: i64,
    pub max_page_size: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_search_limit: 1000,
            approx_index_threshold: 25_000,
            max_page_size: 100,
        }
    }
}

/// How candidates are retrieved. Chosen per query from the corpus size; a
/// pure performance decision that never changes the scoring contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Sequential scan, filters first. Fast enough below the threshold.
    Exact,
    /// HNSW scan with bounded `ef_search`/`max_scan_tuples`. Sequential
    /// scans scale quadratically with corpus size, so past the threshold
    /// the index wins even with its fixed overhead.
    Approximate,
}

pub fn determine_search_strategy(filtered_count: i64, threshold: i64) -> SearchStrategy {
    if filtered_count < threshold {
        SearchStrategy::Exact
    } else {
        SearchStrategy::Approximate
    }
}

/// Search service combining query embedding with similarity retrieval.
///
/// # Type Parameters
///
/// * `E` - Embedder implementation for query embeddings
/// * `X` - SearchIndex implementation for candidate retrieval
pub struct SearchService<E, X>
where
    E: Embedder,
    X: SearchIndex,
{
    embedder: E,
    index: X,
    config: SearchConfig,
}

impl<E, X> SearchService<E, X>
where
    E: Embedder,
    X: SearchIndex,
{
    pub fn new(embedder: E, index: X, config: SearchConfig) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    pub fn with_defaults(embedder: E, index: X) -> Self {
        Self::new(embedder, index, SearchConfig::default())
    }

    /// Execute a search.
    ///
    /// Steps: embed the query's free text (concurrently with the filtered
    /// count), pick the scan strategy from the corpus size, retrieve the
    /// candidate set, score, sort, paginate. Repositories whose embedding
    /// sync is incomplete simply contribute fewer candidates; a search never
    /// fails because background sync is behind.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchPage> {
        let query = params.query.trim();
        let page_size = params.page_size.clamp(1, self.config.max_page_size);
        let page = params.page.max(1);

        if query.is_empty() {
            return Ok(SearchPage::empty(page, page_size));
        }

        let parsed = parse_query(query);
        // Operators are stripped for the embedding; a filter-only query
        // falls back to embedding the original text.
        let embed_input = parsed
            .remaining_query
            .clone()
            .unwrap_or_else(|| query.to_string());
        let scope = params.repo_ids.as_deref();

        let (filtered_count, embedding) = tokio::join!(
            self.index.count_filtered(&parsed, scope),
            self.embedder.embed(&embed_input)
        );
        let filtered_count = filtered_count?;
        let embedding = embedding?;

        let strategy =
            determine_search_strategy(filtered_count, self.config.approx_index_threshold);
        debug!(filtered_count, ?strategy, "Retrieving candidates");

        let candidates = match strategy {
            SearchStrategy::Exact => {
                self.index
                    .exact_candidates(&embedding, &parsed, scope, self.config.vector_search_limit)
                    .await?
            }
            SearchStrategy::Approximate => {
                self.index
                    .approximate_candidates(
                        &embedding,
                        &parsed,
                        scope,
                        self.config.vector_search_limit,
                    )
                    .await?
            }
        };

        let now = OffsetDateTime::now_utc();
        let mut ranked: Vec<RankedIssue> = candidates
            .into_iter()
            .map(|candidate| score_candidate(candidate, now))
            .collect();

        // Score descending, ties broken by most recent update.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.issue_updated_at.cmp(&a.issue_updated_at))
        });

        if params.lucky {
            ranked.truncate(1);
            let total_count = ranked.len() as i64;
            return Ok(SearchPage {
                results: ranked,
                total_count,
                page: 1,
                page_size: 1,
            });
        }

        let total_count = ranked.len() as i64;
        let offset = ((page - 1) * page_size) as usize;
        let results: Vec<RankedIssue> = ranked
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(SearchPage {
            results,
            total_count,
            page,
            page_size,
        })
    }
}

fn score_candidate(candidate: CandidateIssue, now: OffsetDateTime) -> RankedIssue {
    let score = ranking_score(
        candidate.distance,
        candidate.comment_count,
        candidate.issue_updated_at,
        candidate.state,
        now,
    );

    RankedIssue {
        id: candidate.id,
        number: candidate.number,
        title: candidate.title,
        url: candidate.url,
        author: candidate.author,
        state: candidate.state,
        state_reason: candidate.state_reason,
        repo_owner: candidate.repo_owner,
        repo_name: candidate.repo_name,
        comment_count: candidate.comment_count,
        labels: candidate.labels,
        issue_created_at: candidate.issue_created_at,
        issue_updated_at: candidate.issue_updated_at,
        issue_closed_at: candidate.issue_closed_at,
        similarity: similarity_score(candidate.distance),
        score,
    }
}
