// ABOUTME: Server configuration for the sandpit binary
// ABOUTME: Listen address and database URL from the environment, with CLI overrides

use sandpit_config::{constants, first_var, var};
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4100;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sandpit.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid host address: {0}")]
    InvalidHost(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host_str = var(constants::SANDPIT_API_HOST).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host_str))?;

        let port = match first_var(&[constants::SANDPIT_API_PORT, constants::PORT]) {
            Some(raw) => raw.parse::<u16>()?,
            None => DEFAULT_PORT,
        };
        validate_port(port)?;

        let database_url = first_var(&[constants::SANDPIT_DATABASE_URL, constants::DATABASE_URL])
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            host,
            port,
            database_url,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        database_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(port) = port {
            validate_port(port)?;
            self.port = port;
        }
        if let Some(database_url) = database_url {
            self.database_url = database_url;
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn validate_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::PortOutOfRange(port));
    }
    Ok(())
}
