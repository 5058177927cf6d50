use std::sync::Arc;
use std::time::Duration;

use github_issues::GithubClient;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hubseek_api::config::read_config;
use hubseek_api::domain::embedding::embedder::OpenAiEmbedder;
use hubseek_api::domain::embedding::{
    run_embedding_sync_worker, EmbeddingConfig, EmbeddingPipeline,
};
use hubseek_api::domain::sync::{
    run_issue_sync_worker, run_maintenance_worker, GithubIssueSource, RepoSyncService, SyncConfig,
};
use hubseek_api::domain::RateLimiter;
use hubseek_api::repositories::{PgIssueRepository, PgRepoRepository};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = read_config().expect("Failed to read configuration");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect_with(settings.database.with_db())
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let github_client = GithubClient::new(&settings.github.token)?;
    let embedder = OpenAiEmbedder::new()?;
    let rate_limiter = Arc::new(RateLimiter::new());

    let repo_repository = PgRepoRepository::new(pool.clone());
    let issue_repository = PgIssueRepository::new(pool.clone());

    let embedding_config = EmbeddingConfig {
        batch_size: settings.embedding.batch_size,
        concurrency: settings.embedding.concurrency,
        requests_per_minute: settings.embedding.requests_per_minute,
        ..Default::default()
    };

    let sync_service = Arc::new(RepoSyncService::new(
        GithubIssueSource::new(github_client),
        repo_repository.clone(),
        issue_repository.clone(),
        EmbeddingPipeline::new(
            embedder.clone(),
            issue_repository.clone(),
            rate_limiter.clone(),
            embedding_config.clone(),
        ),
        SyncConfig {
            page_size: settings.sync.page_size,
            fan_out: settings.sync.fan_out,
            ..Default::default()
        },
    ));

    let cron_pipeline = EmbeddingPipeline::new(
        embedder,
        issue_repository.clone(),
        rate_limiter,
        embedding_config,
    );

    info!(app = %settings.application.name, "Starting background workers");

    let issue_sync = tokio::spawn(run_issue_sync_worker(
        sync_service,
        Duration::from_secs(settings.sync.issue_sync_interval_minutes * 60),
    ));
    let embedding_sync = tokio::spawn(run_embedding_sync_worker(
        cron_pipeline,
        Duration::from_secs(settings.sync.embedding_sync_interval_minutes * 60),
    ));
    let maintenance = tokio::spawn(run_maintenance_worker(
        repo_repository,
        issue_repository,
        Duration::from_secs(settings.sync.maintenance_interval_minutes * 60),
        time::Duration::hours(1),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    issue_sync.abort();
    embedding_sync.abort();
    maintenance.abort();

    Ok(())
}
