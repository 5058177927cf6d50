use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::domain::{InitStatus, RepoKey, Repository, SyncCursor, SyncStatus};

use super::repo_error::RepositoryError;

/// Persistence operations for the repository sync lifecycle.
///
/// The dequeue/enqueue pair is the heart of the state machine: `dequeue_next`
/// flips exactly one queued repository to `in_progress` inside a locking
/// transaction, which is what enforces the one-sync-per-repository invariant.
#[async_trait]
pub trait RepoRepository: Send + Sync {
    async fn create(&self, key: &RepoKey) -> Result<Repository, RepositoryError>;
    async fn get(&self, repo_id: i32) -> Result<Option<Repository>, RepositoryError>;
    async fn set_init_status(
        &self,
        repo_id: i32,
        status: InitStatus,
    ) -> Result<(), RepositoryError>;
    /// The oldest `pending` repository, or `None` while another repository
    /// is still being initialized (one initial load at a time).
    async fn next_pending_init(&self) -> Result<Option<i32>, RepositoryError>;
    /// Queue repositories that are ready (or previously errored) and whose
    /// last sync is older than `min_age`. Returns the queued ids.
    async fn enqueue_for_sync(&self, min_age: Duration) -> Result<Vec<i32>, RepositoryError>;
    /// Claim the queued repository with the oldest `last_synced_at` and mark
    /// it `in_progress`. Returns `None` when the queue is drained.
    async fn dequeue_next(&self) -> Result<Option<Repository>, RepositoryError>;
    /// Leave `in_progress`: back to `ready` (stamping `last_synced_at`) on
    /// success, to `error` otherwise.
    async fn finish_sync(&self, repo_id: i32, success: bool) -> Result<(), RepositoryError>;
    async fn set_sync_cursor(
        &self,
        repo_id: i32,
        cursor: &SyncCursor,
    ) -> Result<(), RepositoryError>;
    /// Reset repositories wedged `in_progress` longer than `threshold` so a
    /// later cron pass picks them up again. Returns how many were reset.
    async fn unstuck_stale(&self, threshold: Duration) -> Result<u64, RepositoryError>;
}

#[derive(Clone)]
pub struct PgRepoRepository {
    pool: PgPool,
}

impl PgRepoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RepoRow {
    id: i32,
    owner: String,
    name: String,
    init_status: InitStatus,
    sync_status: SyncStatus,
    sync_cursor: Option<Json<SyncCursor>>,
    issues_last_updated_at: Option<OffsetDateTime>,
    last_synced_at: Option<OffsetDateTime>,
}

impl From<RepoRow> for Repository {
    fn from(row: RepoRow) -> Self {
        Repository {
            id: row.id,
            owner: row.owner,
            name: row.name,
            init_status: row.init_status,
            sync_status: row.sync_status,
            sync_cursor: row.sync_cursor.map(|json| json.0),
            issues_last_updated_at: row.issues_last_updated_at,
            last_synced_at: row.last_synced_at,
        }
    }
}

const REPO_COLUMNS: &str = "id, owner, name, init_status, sync_status, sync_cursor, \
                            issues_last_updated_at, last_synced_at";

#[async_trait]
impl RepoRepository for PgRepoRepository {
    async fn create(&self, key: &RepoKey) -> Result<Repository, RepositoryError> {
        let row = sqlx::query_as::<_, RepoRow>(&format!(
            r#"
            INSERT INTO repositories (owner, name)
            VALUES ($1, $2)
            ON CONFLICT (owner, name) DO UPDATE SET updated_at = NOW()
            RETURNING {REPO_COLUMNS}
            "#
        ))
        .bind(&key.owner)
        .bind(&key.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, repo_id: i32) -> Result<Option<Repository>, RepositoryError> {
        let row = sqlx::query_as::<_, RepoRow>(&format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE id = $1"
        ))
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Repository::from))
    }

    async fn set_init_status(
        &self,
        repo_id: i32,
        status: InitStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE repositories
            SET init_status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(repo_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn next_pending_init(&self) -> Result<Option<i32>, RepositoryError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM repositories
            WHERE init_status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM repositories WHERE init_status = 'in_progress'
              )
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn enqueue_for_sync(&self, min_age: Duration) -> Result<Vec<i32>, RepositoryError> {
        let cutoff = OffsetDateTime::now_utc() - min_age;
        let ids: Vec<(i32,)> = sqlx::query_as(
            r#"
            UPDATE repositories
            SET sync_status = 'queued', updated_at = NOW()
            WHERE init_status = 'completed'
              AND sync_status IN ('ready', 'error')
              AND (last_synced_at IS NULL OR last_synced_at < $1)
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn dequeue_next(&self) -> Result<Option<Repository>, RepositoryError> {
        // Single transaction so two workers can never claim the same repo.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RepoRow>(&format!(
            r#"
            SELECT {REPO_COLUMNS}
            FROM repositories
            WHERE init_status = 'completed' AND sync_status = 'queued'
            ORDER BY last_synced_at ASC NULLS FIRST
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE repositories
            SET sync_status = 'in_progress', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut repo = Repository::from(row);
        repo.sync_status = SyncStatus::InProgress;
        Ok(Some(repo))
    }

    async fn finish_sync(&self, repo_id: i32, success: bool) -> Result<(), RepositoryError> {
        if success {
            sqlx::query(
                r#"
                UPDATE repositories
                SET sync_status = 'ready', last_synced_at = NOW(), updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE repositories
                SET sync_status = 'error', updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn set_sync_cursor(
        &self,
        repo_id: i32,
        cursor: &SyncCursor,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE repositories
            SET sync_cursor = $2, issues_last_updated_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(repo_id)
        .bind(Json(cursor))
        .bind(cursor.since)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unstuck_stale(&self, threshold: Duration) -> Result<u64, RepositoryError> {
        let cutoff = OffsetDateTime::now_utc() - threshold;

        let init_reset = sqlx::query(
            r#"
            UPDATE repositories
            SET init_status = 'pending', updated_at = NOW()
            WHERE init_status = 'in_progress' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let sync_reset = sqlx::query(
            r#"
            UPDATE repositories
            SET sync_status = 'ready', updated_at = NOW()
            WHERE sync_status = 'in_progress' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(init_reset + sync_reset)
    }
}
