// ABOUTME: Server bootstrap wiring storage, the Docker runtime and the HTTP router
// ABOUTME: Reconciles leftover state on boot and stops the sweeper on shutdown

use anyhow::Context;
use sandpit_api::{create_router, AppState};
use sandpit_sandbox::{
    run_migrations, DockerRuntime, SandboxRegistry, SandboxSettings, Sandboxes,
    SqliteProjectStore, Sweeper,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;

/// Open (creating if needed) the SQLite database and apply migrations.
pub async fn connect_database(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL: {}", url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", url))?;

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(pool)
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let settings = SandboxSettings::from_env().context("Invalid sandbox settings")?;
    info!(
        "Sandbox ports {}-{}, image {}, workspace {}",
        settings.port_range_start,
        settings.port_range_end,
        settings.image,
        settings.workspace_root.display()
    );

    let pool = connect_database(&config.database_url, 5).await?;

    let docker = DockerRuntime::with_pull_timeout(settings.image_pull_timeout)
        .context("Failed to connect to Docker")?;
    if let Err(e) = docker.ping().await {
        warn!("Docker is not responding, sandboxes will fail to start: {}", e);
    }

    let store = SqliteProjectStore::new(pool.clone());
    let sandboxes = Arc::new(Sandboxes::new(
        settings,
        SandboxRegistry::new(pool),
        Arc::new(docker),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));

    if let Err(e) = sandboxes.service.reconcile().await {
        error!("Startup reconciliation failed: {}", e);
    }

    sandboxes.sweeper.start().await;

    let app = create_router(AppState::new(sandboxes.clone(), Arc::new(store)))
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Sandpit listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sandboxes.sweeper.clone()))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(sweeper: Arc<Sweeper>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, stopping sweeper");
    sweeper.stop().await;
}
