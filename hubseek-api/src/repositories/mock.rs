//! In-memory repositories for exercising the sync state machine and the
//! embedding pipeline without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use github_issues::FetchedIssue;
use time::{Duration, OffsetDateTime};

use crate::domain::{
    EmbeddingSyncStatus, InitStatus, IssueEmbedding, IssueForEmbedding, IssueState, RepoKey,
    Repository, SyncCursor, SyncStatus,
};

use super::{IssueRepository, RepoRepository, RepositoryError};

#[derive(Clone, Default)]
pub struct MockRepoRepository {
    repos: Arc<Mutex<HashMap<i32, Repository>>>,
    next_id: Arc<AtomicI32>,
}

impl MockRepoRepository {
    pub fn new() -> Self {
        Self {
            repos: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI32::new(1)),
        }
    }

    pub fn insert(&self, mut repo: Repository) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        repo.id = id;
        self.repos.lock().unwrap().insert(id, repo);
        id
    }

    pub fn snapshot(&self, repo_id: i32) -> Repository {
        self.repos.lock().unwrap().get(&repo_id).unwrap().clone()
    }

    pub fn in_progress_count(&self) -> usize {
        self.repos
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.sync_status == SyncStatus::InProgress)
            .count()
    }
}

pub fn make_repo(owner: &str, name: &str) -> Repository {
    Repository {
        id: 0,
        owner: owner.to_string(),
        name: name.to_string(),
        init_status: InitStatus::Pending,
        sync_status: SyncStatus::Ready,
        sync_cursor: None,
        issues_last_updated_at: None,
        last_synced_at: None,
    }
}

#[async_trait]
impl RepoRepository for MockRepoRepository {
    async fn create(&self, key: &RepoKey) -> Result<Repository, RepositoryError> {
        {
            let repos = self.repos.lock().unwrap();
            if let Some(existing) = repos
                .values()
                .find(|r| r.owner == key.owner && r.name == key.name)
            {
                return Ok(existing.clone());
            }
        }
        let id = self.insert(make_repo(&key.owner, &key.name));
        Ok(self.snapshot(id))
    }

    async fn get(&self, repo_id: i32) -> Result<Option<Repository>, RepositoryError> {
        Ok(self.repos.lock().unwrap().get(&repo_id).cloned())
    }

    async fn set_init_status(
        &self,
        repo_id: i32,
        status: InitStatus,
    ) -> Result<(), RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos
            .get_mut(&repo_id)
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;
        repo.init_status = status;
        Ok(())
    }

    async fn next_pending_init(&self) -> Result<Option<i32>, RepositoryError> {
        let repos = self.repos.lock().unwrap();
        if repos
            .values()
            .any(|r| r.init_status == InitStatus::InProgress)
        {
            return Ok(None);
        }
        Ok(repos
            .values()
            .filter(|r| r.init_status == InitStatus::Pending)
            .map(|r| r.id)
            .min())
    }

    async fn enqueue_for_sync(&self, min_age: Duration) -> Result<Vec<i32>, RepositoryError> {
        let cutoff = OffsetDateTime::now_utc() - min_age;
        let mut queued = Vec::new();
        let mut repos = self.repos.lock().unwrap();
        for repo in repos.values_mut() {
            let eligible = repo.init_status == InitStatus::Completed
                && matches!(repo.sync_status, SyncStatus::Ready | SyncStatus::Error)
                && repo.last_synced_at.map(|t| t < cutoff).unwrap_or(true);
            if eligible {
                repo.sync_status = SyncStatus::Queued;
                queued.push(repo.id);
            }
        }
        Ok(queued)
    }

    async fn dequeue_next(&self) -> Result<Option<Repository>, RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let next_id = repos
            .values()
            .filter(|r| {
                r.init_status == InitStatus::Completed && r.sync_status == SyncStatus::Queued
            })
            .min_by_key(|r| r.last_synced_at)
            .map(|r| r.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let repo = repos.get_mut(&id).unwrap();
        repo.sync_status = SyncStatus::InProgress;
        Ok(Some(repo.clone()))
    }

    async fn finish_sync(&self, repo_id: i32, success: bool) -> Result<(), RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos
            .get_mut(&repo_id)
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;
        if success {
            repo.sync_status = SyncStatus::Ready;
            repo.last_synced_at = Some(OffsetDateTime::now_utc());
        } else {
            repo.sync_status = SyncStatus::Error;
        }
        Ok(())
    }

    async fn set_sync_cursor(
        &self,
        repo_id: i32,
        cursor: &SyncCursor,
    ) -> Result<(), RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos
            .get_mut(&repo_id)
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;
        repo.sync_cursor = Some(cursor.clone());
        repo.issues_last_updated_at = Some(cursor.since);
        Ok(())
    }

    async fn unstuck_stale(&self, _threshold: Duration) -> Result<u64, RepositoryError> {
        let mut repos = self.repos.lock().unwrap();
        let mut reset = 0;
        for repo in repos.values_mut() {
            if repo.init_status == InitStatus::InProgress {
                repo.init_status = InitStatus::Pending;
                reset += 1;
            }
            if repo.sync_status == SyncStatus::InProgress {
                repo.sync_status = SyncStatus::Ready;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[derive(Debug, Clone)]
pub struct MockIssueRecord {
    pub id: i32,
    pub repo_id: i32,
    pub github_id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub status: EmbeddingSyncStatus,
}

#[derive(Clone, Default)]
pub struct MockIssueRepository {
    issues: Arc<Mutex<HashMap<i32, MockIssueRecord>>>,
    upsert_log: Arc<Mutex<Vec<String>>>,
    next_id: Arc<AtomicI32>,
}

impl MockIssueRepository {
    pub fn new() -> Self {
        Self {
            issues: Arc::new(Mutex::new(HashMap::new())),
            upsert_log: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicI32::new(1)),
        }
    }

    /// Seed an issue directly, bypassing page ingestion.
    pub fn seed(&self, repo_id: i32, number: i64, status: EmbeddingSyncStatus) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.issues.lock().unwrap().insert(
            id,
            MockIssueRecord {
                id,
                repo_id,
                github_id: format!("I_{number}"),
                number,
                title: format!("Issue {number}"),
                body: "body".to_string(),
                state: IssueState::Open,
                embedding: None,
                embedding_model: None,
                status,
            },
        );
        id
    }

    pub fn record(&self, issue_id: i32) -> MockIssueRecord {
        self.issues.lock().unwrap().get(&issue_id).unwrap().clone()
    }

    pub fn github_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .issues
            .lock()
            .unwrap()
            .values()
            .map(|i| i.github_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every github id ever passed to `upsert_page`, in order.
    pub fn upsert_log(&self) -> Vec<String> {
        self.upsert_log.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<EmbeddingSyncStatus> {
        self.issues
            .lock()
            .unwrap()
            .values()
            .map(|i| i.status)
            .collect()
    }

    pub fn count_with_status(&self, status: EmbeddingSyncStatus) -> usize {
        self.statuses().iter().filter(|s| **s == status).count()
    }
}

#[async_trait]
impl IssueRepository for MockIssueRepository {
    async fn upsert_page(
        &self,
        repo_id: i32,
        issues: &[FetchedIssue],
    ) -> Result<Vec<i32>, RepositoryError> {
        let mut store = self.issues.lock().unwrap();
        let mut log = self.upsert_log.lock().unwrap();
        let mut ids = Vec::with_capacity(issues.len());

        for issue in issues {
            log.push(issue.github_id.clone());
            let existing_id = store
                .values()
                .find(|i| i.github_id == issue.github_id)
                .map(|i| i.id);
            let id = existing_id
                .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));

            store.insert(
                id,
                MockIssueRecord {
                    id,
                    repo_id,
                    github_id: issue.github_id.clone(),
                    number: issue.number,
                    title: issue.title.clone(),
                    body: issue.body.clone(),
                    state: issue.state.into(),
                    embedding: None,
                    embedding_model: None,
                    status: EmbeddingSyncStatus::Pending,
                },
            );
            ids.push(id);
        }

        Ok(ids)
    }

    async fn select_for_embedding(
        &self,
        issue_ids: &[i32],
    ) -> Result<Vec<IssueForEmbedding>, RepositoryError> {
        let store = self.issues.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        Ok(issue_ids
            .iter()
            .filter_map(|id| store.get(id))
            .map(|record| IssueForEmbedding {
                id: record.id,
                number: record.number,
                title: record.title.clone(),
                body: record.body.clone(),
                state: record.state,
                state_reason: None,
                author: None,
                labels: vec![],
                issue_created_at: now,
                issue_closed_at: None,
            })
            .collect())
    }

    async fn outdated_issue_ids(&self, active_model: &str) -> Result<Vec<i32>, RepositoryError> {
        let store = self.issues.lock().unwrap();
        let mut ids: Vec<i32> = store
            .values()
            .filter(|i| {
                i.status == EmbeddingSyncStatus::Pending
                    || (i.status == EmbeddingSyncStatus::Ready
                        && i.embedding_model.as_deref() != Some(active_model))
            })
            .map(|i| i.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn mark_embedding_status(
        &self,
        issue_ids: &[i32],
        status: EmbeddingSyncStatus,
    ) -> Result<(), RepositoryError> {
        let mut store = self.issues.lock().unwrap();
        for id in issue_ids {
            if let Some(record) = store.get_mut(id) {
                record.status = status;
            }
        }
        Ok(())
    }

    async fn store_embeddings(
        &self,
        embeddings: &[IssueEmbedding],
        model: &str,
    ) -> Result<(), RepositoryError> {
        let mut store = self.issues.lock().unwrap();
        for embedding in embeddings {
            if let Some(record) = store.get_mut(&embedding.issue_id) {
                record.embedding = Some(embedding.vector.clone());
                record.embedding_model = Some(model.to_string());
                record.status = EmbeddingSyncStatus::Ready;
            }
        }
        Ok(())
    }

    async fn requeue_stuck(&self, _threshold: Duration) -> Result<u64, RepositoryError> {
        let mut store = self.issues.lock().unwrap();
        let mut moved = 0;
        for record in store.values_mut() {
            if record.status == EmbeddingSyncStatus::Error {
                record.status = EmbeddingSyncStatus::Pending;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn count_ready(&self, repo_id: i32) -> Result<i64, RepositoryError> {
        let store = self.issues.lock().unwrap();
        Ok(store
            .values()
            .filter(|i| i.repo_id == repo_id && i.status == EmbeddingSyncStatus::Ready)
            .count() as i64)
    }
}
