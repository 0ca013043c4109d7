// ABOUTME: Sandbox settings loaded from the environment
// ABOUTME: Port range, resource limits, reclamation ceilings and container defaults

use chrono::Duration;
use sandpit_config::{constants, var};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Port range {start}-{end} is empty or inverted")]
    InvalidPortRange { start: u16, end: u16 },
    #[error("Port range {start}-{end} cannot hold one block of {block} ports")]
    RangeTooSmall { start: u16, end: u16, block: usize },
    #[error("At least one dev-server port is required")]
    NoDevPorts,
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

/// Per-container resource ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Relative CPU weight (Docker `cpu_shares`, 1024 = one full share)
    pub cpu_shares: i64,
    pub memory_mb: u64,
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_shares: 512,
            memory_mb: 512,
            pids_limit: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Host directory under which each project's files are materialized
    pub workspace_root: PathBuf,
    pub image: String,
    /// Interactive shell opened by the terminal bridge
    pub shell: Vec<String>,
    /// Non-root `uid:gid` the container runs as
    pub container_user: String,
    /// Mount point of the project tree inside the container
    pub container_workdir: String,

    /// Inclusive host port range handed out by the pool
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Dev-server ports inside the container, mapped onto consecutive host ports
    pub dev_ports: Vec<u16>,
    pub probe_host_ports: bool,

    pub limits: ResourceLimits,

    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub sweep_interval: std::time::Duration,
    pub stop_timeout_secs: u64,
    pub activity_touch_interval: Duration,
    pub image_pull_timeout: std::time::Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("sandpit-workspaces"),
            image: "node:20-bookworm-slim".to_string(),
            shell: vec!["/bin/sh".to_string(), "-l".to_string()],
            container_user: "1000:1000".to_string(),
            container_workdir: "/workspace".to_string(),
            port_range_start: 20000,
            port_range_end: 20999,
            dev_ports: vec![3000],
            probe_host_ports: true,
            limits: ResourceLimits::default(),
            idle_timeout: Duration::seconds(600),
            max_lifetime: Duration::seconds(3600),
            sweep_interval: std::time::Duration::from_secs(30),
            stop_timeout_secs: 5,
            activity_touch_interval: Duration::seconds(15),
            image_pull_timeout: std::time::Duration::from_secs(600),
        }
    }
}

impl SandboxSettings {
    /// Build settings from `SANDPIT_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings = Self {
            workspace_root: var(constants::SANDPIT_WORKSPACE_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            image: var(constants::SANDPIT_IMAGE).unwrap_or(defaults.image),
            shell: var(constants::SANDPIT_SHELL)
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.shell),
            container_user: var(constants::SANDPIT_CONTAINER_USER)
                .unwrap_or(defaults.container_user),
            container_workdir: var(constants::SANDPIT_CONTAINER_WORKDIR)
                .unwrap_or(defaults.container_workdir),
            port_range_start: parse_var(
                constants::SANDPIT_PORT_RANGE_START,
                defaults.port_range_start,
            )?,
            port_range_end: parse_var(constants::SANDPIT_PORT_RANGE_END, defaults.port_range_end)?,
            dev_ports: match var(constants::SANDPIT_DEV_PORTS) {
                Some(raw) => parse_port_list(constants::SANDPIT_DEV_PORTS, &raw)?,
                None => defaults.dev_ports,
            },
            probe_host_ports: parse_var(
                constants::SANDPIT_PROBE_HOST_PORTS,
                defaults.probe_host_ports,
            )?,
            limits: ResourceLimits {
                cpu_shares: parse_var(constants::SANDPIT_CPU_SHARES, defaults.limits.cpu_shares)?,
                memory_mb: parse_var(constants::SANDPIT_MEMORY_MB, defaults.limits.memory_mb)?,
                pids_limit: parse_var(constants::SANDPIT_PIDS_LIMIT, defaults.limits.pids_limit)?,
            },
            idle_timeout: Duration::seconds(parse_var(
                constants::SANDPIT_IDLE_TIMEOUT_SECS,
                defaults.idle_timeout.num_seconds(),
            )?),
            max_lifetime: Duration::seconds(parse_var(
                constants::SANDPIT_MAX_LIFETIME_SECS,
                defaults.max_lifetime.num_seconds(),
            )?),
            sweep_interval: std::time::Duration::from_secs(parse_var(
                constants::SANDPIT_SWEEP_INTERVAL_SECS,
                defaults.sweep_interval.as_secs(),
            )?),
            stop_timeout_secs: parse_var(
                constants::SANDPIT_STOP_TIMEOUT_SECS,
                defaults.stop_timeout_secs,
            )?,
            activity_touch_interval: Duration::seconds(parse_var(
                constants::SANDPIT_ACTIVITY_TOUCH_SECS,
                defaults.activity_touch_interval.num_seconds(),
            )?),
            image_pull_timeout: std::time::Duration::from_secs(parse_var(
                constants::SANDPIT_IMAGE_PULL_TIMEOUT_SECS,
                defaults.image_pull_timeout.as_secs(),
            )?),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range_start == 0 || self.port_range_end < self.port_range_start {
            return Err(ConfigError::InvalidPortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        if self.dev_ports.is_empty() {
            return Err(ConfigError::NoDevPorts);
        }
        let ceilings = [
            (constants::SANDPIT_IDLE_TIMEOUT_SECS, self.idle_timeout),
            (constants::SANDPIT_MAX_LIFETIME_SECS, self.max_lifetime),
        ];
        for (name, ceiling) in ceilings {
            if ceiling <= Duration::zero() {
                return Err(ConfigError::NotPositive { name });
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                name: constants::SANDPIT_SWEEP_INTERVAL_SECS,
            });
        }
        if self.activity_touch_interval < Duration::zero() {
            return Err(ConfigError::NotPositive {
                name: constants::SANDPIT_ACTIVITY_TOUCH_SECS,
            });
        }
        let width = usize::from(self.port_range_end - self.port_range_start) + 1;
        if width < self.dev_ports.len() {
            return Err(ConfigError::RangeTooSmall {
                start: self.port_range_start,
                end: self.port_range_end,
                block: self.dev_ports.len(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_port_list(name: &str, raw: &str) -> Result<Vec<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: raw.to_string(),
                })
        })
        .collect()
}
