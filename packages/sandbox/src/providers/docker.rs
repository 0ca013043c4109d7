// ABOUTME: Docker runtime implementation for project sandboxes
// ABOUTME: Uses bollard to create, exec into, inspect and stop sandbox containers

use super::{
    ContainerConfig, ContainerInfo, ContainerMetrics, ContainerRuntime, ContainerStatus,
    ExecOutput, OutputChunk, ProviderError, Result, ShellSession, StreamType,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions, StatsOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use futures::{future, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label marking containers this service owns
pub const MANAGED_LABEL: &str = "sandpit.managed";
pub const PROJECT_LABEL: &str = "sandpit.project_id";
pub const OWNER_LABEL: &str = "sandpit.owner_id";
pub const SANDBOX_LABEL: &str = "sandpit.sandbox_id";

pub struct DockerRuntime {
    client: Docker,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: Docker, pull_timeout: Duration) -> Self {
        Self {
            client,
            pull_timeout,
        }
    }

    /// Verify the daemon answers before serving traffic
    pub async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))
    }

    fn to_bollard_config(config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &config.ports {
            let container_port = format!("{}/tcp", port.container_port);
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|v| {
                format!(
                    "{}:{}:{}",
                    v.host_path,
                    v.container_path,
                    if v.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let host_config = HostConfig {
            binds: Some(binds),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            cpu_shares: Some(config.cpu_shares),
            memory: Some((config.memory_mb * 1024 * 1024) as i64),
            pids_limit: Some(config.pids_limit),
            // Stopped sandboxes disappear on their own
            auto_remove: Some(true),
            privileged: Some(false),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: config.command.clone(),
            user: Some(config.user.clone()),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            tty: Some(false),
            ..Default::default()
        }
    }

    fn convert_status(state: &str) -> ContainerStatus {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" | "restarting" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(progress) = stream.next().await {
                let progress = progress.map_err(|e| {
                    ProviderError::ImageError(format!("Failed to pull image {}: {}", image, e))
                })?;
                if let Some(error) = progress.error {
                    return Err(ProviderError::ImageError(format!(
                        "Failed to pull image {}: {}",
                        image, error
                    )));
                }
                if let Some(status) = progress.status {
                    debug!("Pull status: {}", status);
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(result) => result,
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    fn map_not_found(container_id: &str, e: BollardError) -> ProviderError {
        match e {
            BollardError::DockerResponseServerError {
                status_code: 404, ..
            } => ProviderError::NotFound(container_id.to_string()),
            other => ProviderError::ContainerError(other.to_string()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        if !self.image_exists(&config.image).await? {
            self.pull_image(&config.image).await?;
        }

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(config))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", config.name, warning);
        }
        debug!("Created container: {}", container.id);
        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::map_not_found(container_id, e))
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        match self.client.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped, 404: already auto-removed
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                debug!("Container {} already stopped", container_id);
                Ok(())
            }
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => Ok(()),
            // 409: auto-remove already in progress
            Err(BollardError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| Self::map_not_found(container_id, e))?;

        let status = Self::convert_status(
            inspect
                .state
                .as_ref()
                .and_then(|state| state.status.as_ref())
                .map(|s| s.as_ref())
                .unwrap_or("unknown"),
        );

        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: inspect
                .name
                .unwrap_or_else(|| container_id.to_string())
                .trim_start_matches('/')
                .to_string(),
            status,
            labels: inspect
                .config
                .and_then(|config| config.labels)
                .unwrap_or_default(),
        })
    }

    async fn list_managed(&self) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        )]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                Some(ContainerInfo {
                    name: c
                        .names
                        .and_then(|names| names.into_iter().next())
                        .unwrap_or_else(|| id.clone())
                        .trim_start_matches('/')
                        .to_string(),
                    status: Self::convert_status(c.state.as_deref().unwrap_or("unknown")),
                    labels: c.labels.unwrap_or_default(),
                    id,
                })
            })
            .collect())
    }

    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<ExecOutput> {
        info!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| Self::map_not_found(container_id, e))?;

        let output = match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(ProviderError::ExecError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        };

        let chunks = output
            .filter_map(|item| {
                future::ready(match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk {
                            stream: StreamType::Stdout,
                            data: message.to_vec(),
                        }))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk {
                        stream: StreamType::Stderr,
                        data: message.to_vec(),
                    })),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(ProviderError::ExecError(e.to_string()))),
                })
            })
            .boxed();

        Ok(ExecOutput {
            exec_id: exec.id,
            chunks,
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?;
        Ok(inspect.exit_code)
    }

    async fn open_shell(&self, container_id: &str, command: Vec<String>) -> Result<ShellSession> {
        debug!("Opening shell in container {}: {:?}", container_id, command);

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            env: Some(vec!["TERM=xterm-256color".to_string()]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| Self::map_not_found(container_id, e))?;

        let options = StartExecOptions {
            detach: false,
            tty: true,
            ..Default::default()
        };
        match self
            .client
            .start_exec(&exec.id, Some(options))
            .await
            .map_err(|e| ProviderError::ExecError(e.to_string()))?
        {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .filter_map(|item| {
                        future::ready(match item {
                            Ok(LogOutput::StdIn { .. }) => None,
                            Ok(log) => Some(Ok(log.into_bytes().to_vec())),
                            Err(e) => Some(Err(ProviderError::ExecError(e.to_string()))),
                        })
                    })
                    .boxed();
                Ok(ShellSession { output, input })
            }
            StartExecResults::Detached => Err(ProviderError::ExecError(
                "Shell exec was detached unexpectedly".to_string(),
            )),
        }
    }

    async fn metrics(&self, container_id: &str) -> Result<ContainerMetrics> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stats_stream = self.client.stats(container_id, Some(options));

        match stats_stream.next().await {
            Some(Ok(stats)) => {
                let cpu_delta = stats
                    .cpu_stats
                    .cpu_usage
                    .total_usage
                    .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
                let system_delta = stats
                    .cpu_stats
                    .system_cpu_usage
                    .unwrap_or(0)
                    .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));

                let cpu_usage_percent = if system_delta > 0 && cpu_delta > 0 {
                    (cpu_delta as f64 / system_delta as f64)
                        * 100.0
                        * stats.cpu_stats.online_cpus.unwrap_or(1) as f64
                } else {
                    0.0
                };

                Ok(ContainerMetrics {
                    cpu_usage_percent,
                    memory_usage_mb: stats.memory_stats.usage.unwrap_or(0) / (1024 * 1024),
                    memory_limit_mb: stats.memory_stats.limit.unwrap_or(0) / (1024 * 1024),
                })
            }
            Some(Err(e)) => Err(Self::map_not_found(container_id, e)),
            None => Err(ProviderError::ContainerError(
                "Failed to get container stats".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PortMapping, VolumeMount};

    fn sample_config() -> ContainerConfig {
        ContainerConfig {
            image: "node:20-bookworm-slim".to_string(),
            name: "sandpit-sbx1".to_string(),
            user: "1000:1000".to_string(),
            working_dir: "/workspace".to_string(),
            volumes: vec![VolumeMount {
                host_path: "/srv/sandpit/p1".to_string(),
                container_path: "/workspace".to_string(),
                readonly: false,
            }],
            ports: vec![
                PortMapping {
                    host_port: 20000,
                    container_port: 3000,
                },
                PortMapping {
                    host_port: 20001,
                    container_port: 5173,
                },
            ],
            cpu_shares: 512,
            memory_mb: 256,
            pids_limit: 128,
            command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: HashMap::from([(PROJECT_LABEL.to_string(), "p1".to_string())]),
        }
    }

    #[test]
    fn test_container_config_conversion() {
        let config = DockerRuntime::to_bollard_config(&sample_config());

        assert_eq!(config.image.as_deref(), Some("node:20-bookworm-slim"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(PROJECT_LABEL).map(String::as_str), Some("p1"));

        let host = config.host_config.unwrap();
        assert_eq!(host.cpu_shares, Some(512));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.pids_limit, Some(128));
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.binds,
            Some(vec!["/srv/sandpit/p1:/workspace:rw".to_string()])
        );

        let bindings = host.port_bindings.unwrap();
        let dev = bindings.get("5173/tcp").cloned().flatten().unwrap();
        assert_eq!(dev[0].host_port.as_deref(), Some("20001"));
    }

    #[test]
    fn test_convert_status() {
        assert_eq!(
            DockerRuntime::convert_status("running"),
            ContainerStatus::Running
        );
        assert_eq!(
            DockerRuntime::convert_status("exited"),
            ContainerStatus::Stopped
        );
        assert_eq!(
            DockerRuntime::convert_status("weird"),
            ContainerStatus::Unknown("weird".to_string())
        );
    }
}
