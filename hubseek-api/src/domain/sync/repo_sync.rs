use futures::future;
use github_issues::GithubFetchError;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::domain::embedding::{EmbeddingError, IssueEmbedder};
use crate::domain::{InitStatus, Repository, RetryPolicy, SyncCursor, SyncMode};
use crate::repositories::{IssueRepository, RepoRepository, RepositoryError};

use super::source::IssueSource;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(#[from] GithubFetchError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Repository {0} not found")]
    RepoNotFound(i32),
    #[error("Page fetch timed out")]
    Timeout,
}

impl SyncError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteFetch(GithubFetchError::Http(_))
                | SyncError::RemoteFetch(GithubFetchError::Api(_))
                | SyncError::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Repositories synced concurrently during a cron pass.
    pub fan_out: usize,
    /// Repositories synced more recently than this are skipped by cron.
    pub min_sync_age: time::Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            fan_out: 2,
            min_sync_age: time::Duration::minutes(10),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub repos_synced: usize,
    pub issues_synced: usize,
    pub errors: usize,
}

/// Drives a repository through its sync lifecycle.
///
/// Pages within one repository are strictly sequential and each page's
/// cursor is durably persisted before the next page is requested; distinct
/// repositories are processed by a small pool of chained workers.
///
/// # Type Parameters
///
/// * `S` - IssueSource for the remote API
/// * `R` - RepoRepository for repository state
/// * `I` - IssueRepository for issue persistence
/// * `P` - IssueEmbedder for init-mode embedding
pub struct RepoSyncService<S, R, I, P>
where
    S: IssueSource,
    R: RepoRepository,
    I: IssueRepository,
    P: IssueEmbedder,
{
    source: S,
    repos: R,
    issues: I,
    embedder: P,
    config: SyncConfig,
}

impl<S, R, I, P> RepoSyncService<S, R, I, P>
where
    S: IssueSource,
    R: RepoRepository,
    I: IssueRepository,
    P: IssueEmbedder,
{
    pub fn new(source: S, repos: R, issues: I, embedder: P, config: SyncConfig) -> Self {
        Self {
            source,
            repos,
            issues,
            embedder,
            config,
        }
    }

    /// Initial load entry point: fetch everything, embed as pages land, and
    /// leave the repository `completed`, `no_issues` or `error`.
    #[instrument(name = "RepoSyncService::run_init_sync", skip(self))]
    pub async fn run_init_sync(&self, repo_id: i32) -> Result<(), SyncError> {
        let repo = self
            .repos
            .get(repo_id)
            .await?
            .ok_or(SyncError::RepoNotFound(repo_id))?;

        if repo.init_status != InitStatus::Pending {
            warn!(repo = %repo.key(), status = ?repo.init_status, "Skipping init, not pending");
            return Ok(());
        }

        self.repos
            .set_init_status(repo_id, InitStatus::InProgress)
            .await?;

        match self.sync_issue_pages(&repo, SyncMode::Init).await {
            Ok(0) if repo.sync_cursor.is_none() => {
                info!(repo = %repo.key(), "Repository has no issues");
                self.repos
                    .set_init_status(repo_id, InitStatus::NoIssues)
                    .await?;
                Ok(())
            }
            Ok(count) => {
                info!(repo = %repo.key(), issues = count, "Initial sync completed");
                self.repos
                    .set_init_status(repo_id, InitStatus::Completed)
                    .await?;
                Ok(())
            }
            Err(err) => {
                // The repository must land in `error` before the error
                // propagates; a wedged `in_progress` row would block every
                // future pass.
                self.repos
                    .set_init_status(repo_id, InitStatus::Error)
                    .await?;
                Err(err)
            }
        }
    }

    /// Run one initial load if any repository is waiting for one.
    pub async fn run_pending_init(&self) -> Result<Option<i32>, SyncError> {
        let Some(repo_id) = self.repos.next_pending_init().await? else {
            return Ok(None);
        };
        self.run_init_sync(repo_id).await?;
        Ok(Some(repo_id))
    }

    /// Cron entry point: queue eligible repositories, then drain the queue
    /// with `fan_out` chained workers, oldest `last_synced_at` first.
    pub async fn run_cron_sync(&self) -> Result<SyncStats, SyncError> {
        let queued = self.repos.enqueue_for_sync(self.config.min_sync_age).await?;
        if queued.is_empty() {
            return Ok(SyncStats::default());
        }
        info!(queued = queued.len(), "Starting cron sync pass");

        let workers = (0..self.config.fan_out).map(|_| self.drain_queue());
        let partials = future::join_all(workers).await;

        let stats = partials
            .into_iter()
            .fold(SyncStats::default(), |acc, partial| SyncStats {
                repos_synced: acc.repos_synced + partial.repos_synced,
                issues_synced: acc.issues_synced + partial.issues_synced,
                errors: acc.errors + partial.errors,
            });

        info!(
            repos = stats.repos_synced,
            issues = stats.issues_synced,
            errors = stats.errors,
            "Cron sync pass completed"
        );
        Ok(stats)
    }

    /// One worker: claim the next queued repository, sync it, repeat until
    /// the queue is empty. A slow repository only ever occupies one worker.
    async fn drain_queue(&self) -> SyncStats {
        let mut stats = SyncStats::default();
        loop {
            match self.repos.dequeue_next().await {
                Ok(Some(repo)) => match self.sync_repository(&repo).await {
                    Ok(count) => {
                        stats.repos_synced += 1;
                        stats.issues_synced += count;
                    }
                    Err(err) => {
                        error!(repo = %repo.key(), error = %err, "Repository sync failed");
                        stats.errors += 1;
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "Failed to dequeue next repository");
                    stats.errors += 1;
                    break;
                }
            }
        }
        stats
    }

    /// Sync one repository that was already claimed (`sync_status =
    /// in_progress`). Always transitions out of `in_progress` before
    /// returning.
    #[instrument(name = "RepoSyncService::sync_repository", skip_all, fields(repo = %repo.key()))]
    pub async fn sync_repository(&self, repo: &Repository) -> Result<usize, SyncError> {
        match self.sync_issue_pages(repo, SyncMode::Cron).await {
            Ok(count) => {
                self.repos.finish_sync(repo.id, true).await?;
                info!(issues = count, "Repository synced");
                Ok(count)
            }
            Err(err) => {
                if let Err(mark_err) = self.repos.finish_sync(repo.id, false).await {
                    error!(error = %mark_err, "Failed to mark repository as errored");
                }
                Err(err)
            }
        }
    }

    /// The page loop shared by init and cron.
    ///
    /// While a pagination is in flight the persisted cursor keeps the
    /// `since` it was started with (the opaque cursor is only valid for that
    /// query) and advances `after` page by page; the final page moves
    /// `since` to the newest `updatedAt` seen and clears `after`.
    async fn sync_issue_pages(
        &self,
        repo: &Repository,
        mode: SyncMode,
    ) -> Result<usize, SyncError> {
        let key = repo.key();
        let run_since = repo.sync_cursor.as_ref().map(|c| c.since);
        let mut after = repo.sync_cursor.as_ref().and_then(|c| c.after.clone());
        let mut newest = run_since;
        let mut total = 0;

        loop {
            let page = retry_fetch(
                &self.config.retry_policy,
                || async {
                    self.source
                        .fetch_page(&key, run_since, after.as_deref(), self.config.page_size)
                        .await
                        .map_err(SyncError::from)
                },
            )
            .await?;

            if page.issues.is_empty() {
                break;
            }

            let issue_ids = self.issues.upsert_page(repo.id, &page.issues).await?;
            if mode == SyncMode::Init {
                self.embedder.embed_issues(&issue_ids, mode).await?;
            }
            total += issue_ids.len();

            let last_updated = page
                .issues
                .last()
                .map(|issue| issue.updated_at)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            newest = Some(newest.map_or(last_updated, |n| n.max(last_updated)));

            let cursor = if page.page_info.has_next_page {
                SyncCursor {
                    since: run_since.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    after: page.page_info.end_cursor.clone(),
                }
            } else {
                SyncCursor {
                    since: newest.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                    after: None,
                }
            };
            // Checkpoint-per-page: the cursor must be durable before the
            // next page is requested.
            self.repos.set_sync_cursor(repo.id, &cursor).await?;

            if !page.page_info.has_next_page {
                break;
            }
            after = cursor.after;
        }

        Ok(total)
    }
}

async fn retry_fetch<T, Fut, Op>(policy: &RetryPolicy, op: Op) -> Result<T, SyncError>
where
    Op: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<T, SyncError>>,
{
    crate::domain::retry_with_backoff(policy, op, SyncError::is_retryable, || SyncError::Timeout)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use github_issues::{FetchedIssue, IssueState as GhIssueState};
    use time::OffsetDateTime;

    use super::*;
    use crate::domain::embedding::embedder::MockEmbedder;
    use crate::domain::embedding::{EmbeddingConfig, EmbeddingPipeline};
    use crate::domain::{EmbeddingSyncStatus, RateLimiter, SyncStatus};
    use crate::repositories::mock::{make_repo, MockIssueRepository, MockRepoRepository};
    use crate::repositories::RepoRepository;

    use crate::domain::sync::MockIssueSource;

    type TestService = RepoSyncService<
        MockIssueSource,
        MockRepoRepository,
        MockIssueRepository,
        EmbeddingPipeline<MockEmbedder, MockIssueRepository>,
    >;

    fn make_issue(number: i64, updated_unix: i64) -> FetchedIssue {
        FetchedIssue {
            github_id: format!("I_{number}"),
            number,
            title: format!("Issue {number}"),
            body: "body".to_string(),
            url: format!("https://github.com/acme/widget/issues/{number}"),
            state: GhIssueState::Open,
            state_reason: None,
            author: Some("octocat".to_string()),
            comment_count: 0,
            labels: vec![],
            comments: vec![],
            created_at: OffsetDateTime::from_unix_timestamp(updated_unix - 1000).unwrap(),
            updated_at: OffsetDateTime::from_unix_timestamp(updated_unix).unwrap(),
            closed_at: None,
        }
    }

    fn fast_sync_config(page_size: u32) -> SyncConfig {
        SyncConfig {
            page_size,
            fan_out: 2,
            min_sync_age: time::Duration::ZERO,
            retry_policy: RetryPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                attempt_timeout: Duration::from_millis(500),
            },
        }
    }

    fn service_with(
        source: MockIssueSource,
        repos: MockRepoRepository,
        issues: MockIssueRepository,
        embedder: MockEmbedder,
        config: SyncConfig,
    ) -> TestService {
        let pipeline = EmbeddingPipeline::new(
            embedder,
            issues.clone(),
            Arc::new(RateLimiter::new()),
            EmbeddingConfig {
                requests_per_minute: 100_000,
                retry_policy: RetryPolicy {
                    max_attempts: 1,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(2),
                    attempt_timeout: Duration::from_millis(500),
                },
                ..Default::default()
            },
        );
        RepoSyncService::new(source, repos, issues, pipeline, config)
    }

    #[tokio::test]
    async fn init_sync_fetches_and_embeds_everything() {
        let repos = MockRepoRepository::new();
        let repo_id = repos.insert(make_repo("acme", "widget"));
        let issues = MockIssueRepository::new();
        let source = MockIssueSource::new(vec![
            make_issue(1, 1_000),
            make_issue(2, 2_000),
            make_issue(3, 3_000),
        ]);

        let service = service_with(
            source,
            repos.clone(),
            issues.clone(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        service.run_init_sync(repo_id).await.unwrap();

        let repo = repos.snapshot(repo_id);
        assert_eq!(repo.init_status, InitStatus::Completed);
        assert_eq!(issues.github_ids(), vec!["I_1", "I_2", "I_3"]);
        assert_eq!(issues.count_with_status(EmbeddingSyncStatus::Ready), 3);

        // The final cursor points at the newest updatedAt with no open page.
        let cursor = repo.sync_cursor.expect("cursor persisted");
        assert_eq!(cursor.since.unix_timestamp(), 3_000);
        assert!(cursor.after.is_none());
    }

    #[tokio::test]
    async fn init_sync_of_empty_repository_lands_in_no_issues() {
        let repos = MockRepoRepository::new();
        let repo_id = repos.insert(make_repo("acme", "empty"));
        let service = service_with(
            MockIssueSource::new(vec![]),
            repos.clone(),
            MockIssueRepository::new(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        service.run_init_sync(repo_id).await.unwrap();

        assert_eq!(repos.snapshot(repo_id).init_status, InitStatus::NoIssues);
    }

    #[tokio::test]
    async fn init_embedding_failure_marks_repository_errored() {
        let repos = MockRepoRepository::new();
        let repo_id = repos.insert(make_repo("acme", "widget"));
        let service = service_with(
            MockIssueSource::new(vec![make_issue(1, 1_000)]),
            repos.clone(),
            MockIssueRepository::new(),
            MockEmbedder::returning(vec![0.5; 8]).failing_times(10),
            fast_sync_config(100),
        );

        let result = service.run_init_sync(repo_id).await;

        assert!(result.is_err());
        assert_eq!(repos.snapshot(repo_id).init_status, InitStatus::Error);
    }

    #[tokio::test]
    async fn dequeue_enforces_one_in_flight_sync_per_repository() {
        let repos = MockRepoRepository::new();
        let mut repo = make_repo("acme", "widget");
        repo.init_status = InitStatus::Completed;
        repo.sync_status = SyncStatus::Queued;
        repos.insert(repo);

        let first = repos.dequeue_next().await.unwrap();
        assert!(first.is_some());
        assert_eq!(repos.in_progress_count(), 1);

        // The same repository can not be claimed twice.
        let second = repos.dequeue_next().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn cron_sync_drains_all_queued_repositories() {
        let repos = MockRepoRepository::new();
        for name in ["alpha", "beta", "gamma"] {
            let mut repo = make_repo("acme", name);
            repo.init_status = InitStatus::Completed;
            repos.insert(repo);
        }
        let issues = MockIssueRepository::new();
        let source = MockIssueSource::new(vec![make_issue(1, 1_000)]);

        let service = service_with(
            source,
            repos.clone(),
            issues,
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        let stats = service.run_cron_sync().await.unwrap();

        assert_eq!(stats.repos_synced, 3);
        assert_eq!(stats.errors, 0);
        assert_eq!(repos.in_progress_count(), 0);
    }

    #[tokio::test]
    async fn failed_sync_lands_in_error_not_in_progress() {
        let repos = MockRepoRepository::new();
        let mut repo = make_repo("acme", "widget");
        repo.init_status = InitStatus::Completed;
        let repo_id = repos.insert(repo);

        // Every fetch fails and the retry budget is one attempt.
        let source = MockIssueSource::new(vec![make_issue(1, 1_000)])
            .failing_on_calls([0usize, 1, 2, 3, 4]);
        let service = service_with(
            source,
            repos.clone(),
            MockIssueRepository::new(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        let stats = service.run_cron_sync().await.unwrap();

        assert_eq!(stats.errors, 1);
        let repo = repos.snapshot(repo_id);
        assert_eq!(repo.sync_status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn errored_repositories_are_requeued_by_the_next_pass() {
        let repos = MockRepoRepository::new();
        let mut repo = make_repo("acme", "widget");
        repo.init_status = InitStatus::Completed;
        repo.sync_status = SyncStatus::Error;
        let repo_id = repos.insert(repo);

        let service = service_with(
            MockIssueSource::new(vec![make_issue(1, 1_000)]),
            repos.clone(),
            MockIssueRepository::new(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        let stats = service.run_cron_sync().await.unwrap();

        assert_eq!(stats.repos_synced, 1);
        assert_eq!(repos.snapshot(repo_id).sync_status, SyncStatus::Ready);
    }

    #[tokio::test]
    async fn resuming_after_a_crash_reproduces_the_exact_issue_set() {
        let all_issues: Vec<FetchedIssue> = (1..=5).map(|n| make_issue(n, n * 1_000)).collect();

        // Reference: an uninterrupted run.
        let reference_log = {
            let repos = MockRepoRepository::new();
            let mut repo = make_repo("acme", "widget");
            repo.init_status = InitStatus::Completed;
            repos.insert(repo);
            let issues = MockIssueRepository::new();
            let service = service_with(
                MockIssueSource::new(all_issues.clone()),
                repos,
                issues.clone(),
                MockEmbedder::returning(vec![0.5; 8]),
                fast_sync_config(2),
            );
            service.run_cron_sync().await.unwrap();
            issues.upsert_log()
        };
        assert_eq!(reference_log.len(), 5);

        // Crash during the second page fetch, after page one's cursor was
        // durably persisted.
        let repos = MockRepoRepository::new();
        let mut repo = make_repo("acme", "widget");
        repo.init_status = InitStatus::Completed;
        let repo_id = repos.insert(repo);
        let issues = MockIssueRepository::new();
        let source = MockIssueSource::new(all_issues).failing_on_calls([1usize]);
        let service = service_with(
            source,
            repos.clone(),
            issues.clone(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(2),
        );

        let stats = service.run_cron_sync().await.unwrap();
        assert_eq!(stats.errors, 1);
        let interrupted = repos.snapshot(repo_id);
        assert_eq!(interrupted.sync_status, SyncStatus::Error);
        let cursor = interrupted.sync_cursor.clone().expect("page one checkpoint");
        assert!(cursor.after.is_some());

        // The next cron pass resumes from the persisted cursor.
        let stats = service.run_cron_sync().await.unwrap();
        assert_eq!(stats.repos_synced, 1);

        // No duplicates, no gaps: the combined log matches the reference.
        assert_eq!(issues.upsert_log(), reference_log);
        assert_eq!(repos.snapshot(repo_id).sync_status, SyncStatus::Ready);
    }

    #[tokio::test]
    async fn incremental_sync_only_fetches_issues_updated_since_cursor() {
        let repos = MockRepoRepository::new();
        let mut repo = make_repo("acme", "widget");
        repo.init_status = InitStatus::Completed;
        repo.sync_cursor = Some(SyncCursor {
            since: OffsetDateTime::from_unix_timestamp(2_500).unwrap(),
            after: None,
        });
        repos.insert(repo);

        let issues = MockIssueRepository::new();
        let service = service_with(
            MockIssueSource::new(vec![
                make_issue(1, 1_000),
                make_issue(2, 2_000),
                make_issue(3, 3_000),
            ]),
            repos.clone(),
            issues.clone(),
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        let stats = service.run_cron_sync().await.unwrap();

        assert_eq!(stats.issues_synced, 1);
        assert_eq!(issues.github_ids(), vec!["I_3"]);
    }

    #[tokio::test]
    async fn pending_inits_run_one_at_a_time() {
        let repos = MockRepoRepository::new();
        let first = repos.insert(make_repo("acme", "alpha"));
        let second = repos.insert(make_repo("acme", "beta"));
        let issues = MockIssueRepository::new();

        let service = service_with(
            MockIssueSource::new(vec![make_issue(1, 1_000)]),
            repos.clone(),
            issues,
            MockEmbedder::returning(vec![0.5; 8]),
            fast_sync_config(100),
        );

        assert_eq!(service.run_pending_init().await.unwrap(), Some(first));
        assert_eq!(service.run_pending_init().await.unwrap(), Some(second));
        assert_eq!(service.run_pending_init().await.unwrap(), None);

        assert_eq!(repos.snapshot(first).init_status, InitStatus::Completed);
        assert_eq!(repos.snapshot(second).init_status, InitStatus::Completed);
    }
}
