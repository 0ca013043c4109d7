// ABOUTME: Library half of the sandpit binary
// ABOUTME: Command-line arguments, server configuration and bootstrap

pub mod config;
pub mod server;

use clap::Parser;

pub use config::{ConfigError, ServerConfig};
pub use server::{connect_database, run_server};

pub const DEFAULT_LOG_FILTER: &str = "info,sandpit=debug";

#[derive(Parser, Debug)]
#[command(name = "sandpit")]
#[command(about = "Per-user sandboxed dev environments with a browser terminal", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Port to listen on (overrides SANDPIT_API_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database URL (overrides SANDPIT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,
}

impl Cli {
    pub fn server_config(self) -> Result<ServerConfig, ConfigError> {
        ServerConfig::from_env()?.with_overrides(self.port, self.database_url)
    }
}
