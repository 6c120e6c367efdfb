//! Platform HTTP server

use atheneum::providers::SqlProviderDirectory;
use atheneum::tools::ToolRegistry;
use atheneum::vector::VectorStoreRouter;
use atheneum::{
    AgentRunner, AppState, IngestService, PlatformConfig, Repository, SearchService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(PlatformConfig::load()?);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repo = Repository::new(pool.clone());
    repo.initialize().await?;

    let directory = Arc::new(SqlProviderDirectory::new(pool));
    let vectors = Arc::new(VectorStoreRouter::new(config.vector.clone()));
    let registry = Arc::new(ToolRegistry::with_builtin_tools());
    let shutdown = CancellationToken::new();

    let search = Arc::new(SearchService::new(
        repo.clone(),
        directory.clone(),
        vectors.clone(),
        config.retrieval.clone(),
    ));
    let ingest = IngestService::new(
        repo.clone(),
        directory.clone(),
        vectors.clone(),
        shutdown.clone(),
    );
    let runner = AgentRunner::new(repo, directory, registry, search.clone());

    let state = AppState {
        ingest,
        search,
        runner,
        config: config.clone(),
    };
    let app = atheneum::router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!("listening on {}", config.http.bind);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining in-flight work");
            server_shutdown.cancel();
        })
        .await?;

    Ok(())
}
