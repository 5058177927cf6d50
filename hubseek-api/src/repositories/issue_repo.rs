use async_trait::async_trait;
use github_issues::FetchedIssue;
use pgvector::Vector;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::domain::{EmbeddingSyncStatus, IssueEmbedding, IssueForEmbedding, IssueState};

use super::repo_error::RepositoryError;

/// Persistence operations for issues and their child records.
#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Upsert one ingestion page: issues keyed by GitHub node id, comments
    /// and labels replaced wholesale per issue. Every touched issue drops
    /// back to `embedding_sync_status = pending`. Returns the issue ids.
    async fn upsert_page(
        &self,
        repo_id: i32,
        issues: &[FetchedIssue],
    ) -> Result<Vec<i32>, RepositoryError>;
    async fn select_for_embedding(
        &self,
        issue_ids: &[i32],
    ) -> Result<Vec<IssueForEmbedding>, RepositoryError>;
    /// Issues whose embedding is missing or was generated under a different
    /// model, excluding repositories that are mid-sync.
    async fn outdated_issue_ids(&self, active_model: &str) -> Result<Vec<i32>, RepositoryError>;
    async fn mark_embedding_status(
        &self,
        issue_ids: &[i32],
        status: EmbeddingSyncStatus,
    ) -> Result<(), RepositoryError>;
    async fn store_embeddings(
        &self,
        embeddings: &[IssueEmbedding],
        model: &str,
    ) -> Result<(), RepositoryError>;
    /// Push issues stuck in a non-terminal embedding state (or errored)
    /// longer than `threshold` back to `pending`. Returns how many moved.
    async fn requeue_stuck(&self, threshold: Duration) -> Result<u64, RepositoryError>;
    /// Number of issues in the repository that are searchable right now.
    async fn count_ready(&self, repo_id: i32) -> Result<i64, RepositoryError>;
}

#[derive(Clone)]
pub struct PgIssueRepository {
    pool: PgPool,
}

impl PgIssueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Postgres rejects NUL bytes in text columns.
fn sanitize(text: &str) -> String {
    if text.contains('\0') {
        text.replace('\0', "")
    } else {
        text.to_string()
    }
}

#[derive(sqlx::FromRow)]
struct IssueForEmbeddingRow {
    id: i32,
    number: i64,
    title: String,
    body: String,
    state: IssueState,
    state_reason: Option<String>,
    author: Option<String>,
    labels: Vec<String>,
    issue_created_at: OffsetDateTime,
    issue_closed_at: Option<OffsetDateTime>,
}

#[async_trait]
impl IssueRepository for PgIssueRepository {
    async fn upsert_page(
        &self,
        repo_id: i32,
        issues: &[FetchedIssue],
    ) -> Result<Vec<i32>, RepositoryError> {
        if issues.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self.pool.begin().await?;
        let mut issue_ids = Vec::with_capacity(issues.len());

        for issue in issues {
            let (issue_id,): (i32,) = sqlx::query_as(
                r#"
                INSERT INTO issues (
                    repo_id, github_id, number, title, body, url,
                    state, state_reason, author, comment_count,
                    issue_created_at, issue_updated_at, issue_closed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (github_id) DO UPDATE SET
                    number = EXCLUDED.number,
                    title = EXCLUDED.title,
                    body = EXCLUDED.body,
                    url = EXCLUDED.url,
                    state = EXCLUDED.state,
                    state_reason = EXCLUDED.state_reason,
                    author = EXCLUDED.author,
                    comment_count = EXCLUDED.comment_count,
                    issue_updated_at = EXCLUDED.issue_updated_at,
                    issue_closed_at = EXCLUDED.issue_closed_at,
                    embedding_sync_status = 'pending',
                    updated_at = NOW()
                RETURNING id
                "#,
            )
            .bind(repo_id)
            .bind(&issue.github_id)
            .bind(issue.number)
            .bind(sanitize(&issue.title))
            .bind(sanitize(&issue.body))
            .bind(&issue.url)
            .bind(IssueState::from(issue.state))
            .bind(issue.state_reason.map(|r| r.as_str()))
            .bind(issue.author.as_deref())
            .bind(issue.comment_count)
            .bind(issue.created_at)
            .bind(issue.updated_at)
            .bind(issue.closed_at)
            .fetch_one(&mut *tx)
            .await?;

            // Child records have no independent lifecycle: replace them
            // wholesale on every re-sync of the parent.
            sqlx::query("DELETE FROM comments WHERE issue_id = $1")
                .bind(issue_id)
                .execute(&mut *tx)
                .await?;
            for comment in &issue.comments {
                sqlx::query(
                    r#"
                    INSERT INTO comments (
                        issue_id, github_id, author, body,
                        comment_created_at, comment_updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(issue_id)
                .bind(&comment.github_id)
                .bind(comment.author.as_deref())
                .bind(sanitize(&comment.body))
                .bind(comment.created_at)
                .bind(comment.updated_at)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM issue_labels WHERE issue_id = $1")
                .bind(issue_id)
                .execute(&mut *tx)
                .await?;
            for label in &issue.labels {
                let (label_id,): (i32,) = sqlx::query_as(
                    r#"
                    INSERT INTO labels (github_id, name, color, description)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (github_id) DO UPDATE SET
                        name = EXCLUDED.name,
                        color = EXCLUDED.color,
                        description = EXCLUDED.description
                    RETURNING id
                    "#,
                )
                .bind(&label.github_id)
                .bind(&label.name)
                .bind(&label.color)
                .bind(label.description.as_deref().map(sanitize))
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO issue_labels (issue_id, label_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(issue_id)
                .bind(label_id)
                .execute(&mut *tx)
                .await?;
            }

            issue_ids.push(issue_id);
        }

        tx.commit().await?;
        Ok(issue_ids)
    }

    async fn select_for_embedding(
        &self,
        issue_ids: &[i32],
    ) -> Result<Vec<IssueForEmbedding>, RepositoryError> {
        let rows = sqlx::query_as::<_, IssueForEmbeddingRow>(
            r#"
            SELECT
                i.id, i.number, i.title, i.body, i.state, i.state_reason,
                i.author, i.issue_created_at, i.issue_closed_at,
                COALESCE(
                    (SELECT array_agg(l.name ORDER BY l.name)
                     FROM issue_labels il
                     JOIN labels l ON l.id = il.label_id
                     WHERE il.issue_id = i.id),
                    '{}'
                ) AS labels
            FROM issues i
            WHERE i.id = ANY($1)
            "#,
        )
        .bind(issue_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| IssueForEmbedding {
                id: row.id,
                number: row.number,
                title: row.title,
                body: row.body,
                state: row.state,
                state_reason: row.state_reason,
                author: row.author,
                labels: row.labels,
                issue_created_at: row.issue_created_at,
                issue_closed_at: row.issue_closed_at,
            })
            .collect())
    }

    async fn outdated_issue_ids(&self, active_model: &str) -> Result<Vec<i32>, RepositoryError> {
        let ids: Vec<(i32,)> = sqlx::query_as(
            r#"
            SELECT i.id
            FROM issues i
            JOIN repositories r ON r.id = i.repo_id
            WHERE r.init_status = 'completed'
              AND r.sync_status <> 'in_progress'
              AND (
                  i.embedding_sync_status = 'pending'
                  OR (i.embedding_sync_status = 'ready'
                      AND i.embedding_model IS DISTINCT FROM $1)
              )
            ORDER BY i.id
            "#,
        )
        .bind(active_model)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn mark_embedding_status(
        &self,
        issue_ids: &[i32],
        status: EmbeddingSyncStatus,
    ) -> Result<(), RepositoryError> {
        if issue_ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE issues
            SET embedding_sync_status = $2, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(issue_ids)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn store_embeddings(
        &self,
        embeddings: &[IssueEmbedding],
        model: &str,
    ) -> Result<(), RepositoryError> {
        if embeddings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for embedding in embeddings {
            sqlx::query(
                r#"
                UPDATE issues
                SET embedding = $2,
                    embedding_model = $3,
                    embedding_sync_status = 'ready',
                    embedding_generated_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(embedding.issue_id)
            .bind(Vector::from(embedding.vector.clone()))
            .bind(model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn requeue_stuck(&self, threshold: Duration) -> Result<u64, RepositoryError> {
        let cutoff = OffsetDateTime::now_utc() - threshold;

        let rows = sqlx::query(
            r#"
            UPDATE issues
            SET embedding_sync_status = 'pending', updated_at = NOW()
            WHERE embedding_sync_status IN ('pending', 'error')
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    async fn count_ready(&self, repo_id: i32) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM issues
            WHERE repo_id = $1 AND embedding_sync_status = 'ready'
            "#,
        )
        .bind(repo_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
