//! PostgreSQL similarity index over the pgvector embedding column.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::search::traits::{Result, SearchIndex};
use crate::domain::search::types::{CandidateIssue, ParsedQuery, StateFilter};
use crate::domain::IssueState;

// Bounded scan parameters for the approximate path. Tuned so a query touches
// a fixed slice of the index regardless of corpus size.
const HNSW_EF_SEARCH: u32 = 1000;
const HNSW_MAX_SCAN_TUPLES: u32 = 20_000;
const HNSW_SCAN_MEM_MULTIPLIER: u32 = 2;

const CANDIDATE_SELECT: &str = r#"
    i.id, i.number, i.title, i.url, i.author,
    i.state, i.state_reason,
    r.owner AS repo_owner, r.name AS repo_name,
    i.comment_count,
    COALESCE(
        (SELECT array_agg(l.name ORDER BY l.name)
         FROM issue_labels il
         JOIN labels l ON l.id = il.label_id
         WHERE il.issue_id = i.id),
        '{}'
    ) AS labels,
    i.issue_created_at, i.issue_updated_at, i.issue_closed_at
"#;

/// Index implementation with two query modes over the same vector column:
/// an exact sequential scan that filters before comparing vectors, and an
/// HNSW scan that retrieves a bounded neighborhood first and filters after.
#[derive(Clone)]
pub struct PgSearchIndex {
    pool: PgPool,
}

impl PgSearchIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn like_pattern(value: &str) -> String {
    format!("%{value}%")
}

/// Append the structured filters. The surrounding query must already be in a
/// `WHERE` clause (every pushed fragment starts with ` AND`).
fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    query: &ParsedQuery,
    repo_scope: Option<&[i32]>,
) {
    if let Some(repo_ids) = repo_scope {
        builder.push(" AND i.repo_id = ANY(");
        builder.push_bind(repo_ids.to_vec());
        builder.push(")");
    }

    for value in &query.substring_queries {
        builder.push(" AND (i.title ILIKE ");
        builder.push_bind(like_pattern(value));
        builder.push(" OR i.body ILIKE ");
        builder.push_bind(like_pattern(value));
        builder.push(")");
    }
    for value in &query.title_queries {
        builder.push(" AND i.title ILIKE ");
        builder.push_bind(like_pattern(value));
    }
    for value in &query.body_queries {
        builder.push(" AND i.body ILIKE ");
        builder.push_bind(like_pattern(value));
    }
    for value in &query.author_queries {
        builder.push(" AND i.author ILIKE ");
        builder.push_bind(value.clone());
    }
    for value in &query.repo_queries {
        builder.push(" AND r.name ILIKE ");
        builder.push_bind(value.clone());
    }
    for value in &query.owner_queries {
        builder.push(" AND r.owner ILIKE ");
        builder.push_bind(value.clone());
    }
    for value in &query.label_queries {
        builder.push(
            " AND EXISTS (SELECT 1 FROM issue_labels il \
             JOIN labels l ON l.id = il.label_id \
             WHERE il.issue_id = i.id AND l.name ILIKE ",
        );
        builder.push_bind(value.clone());
        builder.push(")");
    }

    let states: Vec<IssueState> = query
        .state_queries
        .iter()
        .filter_map(|state| match state {
            StateFilter::Open => Some(IssueState::Open),
            StateFilter::Closed => Some(IssueState::Closed),
            // `all` disables state filtering.
            StateFilter::All => None,
        })
        .collect();
    if !query.state_queries.contains(&StateFilter::All) && !states.is_empty() {
        builder.push(" AND i.state IN (");
        let mut separated = builder.separated(", ");
        for state in states {
            separated.push_bind(state);
        }
        builder.push(")");
    }
}

#[async_trait]
impl SearchIndex for PgSearchIndex {
    async fn count_filtered(
        &self,
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
    ) -> Result<i64> {
        let mut builder = QueryBuilder::new(
            "SELECT COUNT(*) FROM issues i \
             JOIN repositories r ON r.id = i.repo_id AND r.init_status = 'completed' \
             WHERE i.embedding IS NOT NULL",
        );
        push_filters(&mut builder, query, repo_scope);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn exact_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>> {
        let mut builder = QueryBuilder::new("SELECT");
        builder.push(CANDIDATE_SELECT);
        builder.push(", (i.embedding <=> ");
        builder.push_bind(Vector::from(embedding.to_vec()));
        builder.push(
            ")::float8 AS distance \
             FROM issues i \
             JOIN repositories r ON r.id = i.repo_id AND r.init_status = 'completed' \
             WHERE i.embedding IS NOT NULL",
        );
        push_filters(&mut builder, query, repo_scope);
        builder.push(" ORDER BY distance ASC LIMIT ");
        builder.push_bind(k as i64);

        let candidates = builder
            .build_query_as::<CandidateIssue>()
            .fetch_all(&self.pool)
            .await?;

        Ok(candidates)
    }

    async fn approximate_candidates(
        &self,
        embedding: &[f32],
        query: &ParsedQuery,
        repo_scope: Option<&[i32]>,
        k: usize,
    ) -> Result<Vec<CandidateIssue>> {
        // The scan parameters are transaction-scoped.
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {HNSW_EF_SEARCH}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL hnsw.max_scan_tuples = {HNSW_MAX_SCAN_TUPLES}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query("SET LOCAL hnsw.iterative_scan = 'relaxed_order'")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL hnsw.scan_mem_multiplier = {HNSW_SCAN_MEM_MULTIPLIER}"
        ))
        .execute(&mut *tx)
        .await?;

        let vector = Vector::from(embedding.to_vec());
        let mut builder = QueryBuilder::new("SELECT");
        builder.push(CANDIDATE_SELECT);
        builder.push(
            ", v.distance \
             FROM (SELECT id AS candidate_id, (embedding <=> ",
        );
        builder.push_bind(vector.clone());
        builder.push(")::float8 AS distance FROM issues WHERE embedding IS NOT NULL ORDER BY embedding <=> ");
        builder.push_bind(vector);
        builder.push(" LIMIT ");
        builder.push_bind(k as i64);
        builder.push(
            ") v \
             JOIN issues i ON i.id = v.candidate_id \
             JOIN repositories r ON r.id = i.repo_id AND r.init_status = 'completed' \
             WHERE TRUE",
        );
        push_filters(&mut builder, query, repo_scope);
        builder.push(" ORDER BY v.distance ASC");

        let candidates = builder
            .build_query_as::<CandidateIssue>()
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(candidates)
    }
}
