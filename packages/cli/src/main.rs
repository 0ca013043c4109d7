// ABOUTME: Entry point for the sandpit server
// ABOUTME: Loads .env, installs logging and hands off to the server bootstrap

use clap::Parser;
use sandpit_cli::{run_server, Cli, DEFAULT_LOG_FILTER};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Cli::parse().server_config()?;
    run_server(config).await
}
