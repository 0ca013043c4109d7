// ABOUTME: Sandbox runtime adapter pairing the port pool with the container runtime
// ABOUTME: Creates, execs into, inspects and stops sandbox containers by handle

use crate::error::{Result, SandboxError};
use crate::pool::PortPool;
use crate::providers::docker::{MANAGED_LABEL, OWNER_LABEL, PROJECT_LABEL, SANDBOX_LABEL};
use crate::providers::{
    ContainerConfig, ContainerInfo, ContainerMetrics, ContainerRuntime, ExecOutput, OutputChunk,
    PortMapping, ShellSession, VolumeMount,
};
use crate::settings::{ResourceLimits, SandboxSettings};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Keeps the container alive between execs.
const IDLE_COMMAND: [&str; 2] = ["sleep", "infinity"];

/// Handle and base port of a freshly started sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSandbox {
    pub container_id: String,
    pub port: u16,
}

/// Identity of the sandbox a container is being created for.
#[derive(Debug, Clone, Copy)]
pub struct SandboxOwner<'a> {
    pub sandbox_id: &'a str,
    pub project_id: &'a str,
    pub owner_user_id: &'a str,
}

pub struct SandboxRuntime {
    runtime: Arc<dyn ContainerRuntime>,
    pool: Arc<PortPool>,
    settings: Arc<SandboxSettings>,
}

impl SandboxRuntime {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        pool: Arc<PortPool>,
        settings: Arc<SandboxSettings>,
    ) -> Self {
        Self {
            runtime,
            pool,
            settings,
        }
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    /// Host ports `[base, base+1, ...]` for each configured dev-server port.
    pub fn port_mappings(&self, base: u16) -> Vec<PortMapping> {
        self.settings
            .dev_ports
            .iter()
            .enumerate()
            .map(|(offset, container_port)| PortMapping {
                host_port: base.saturating_add(offset as u16),
                container_port: *container_port,
            })
            .collect()
    }

    /// Lease a port block held by `owner.sandbox_id`, then create and start a
    /// container bind-mounting `working_dir`. On any failure after the lease,
    /// the lease is returned before `SandboxCreationFailed` propagates.
    pub async fn create_sandbox(
        &self,
        owner: SandboxOwner<'_>,
        working_dir: &Path,
        limits: Option<&ResourceLimits>,
    ) -> Result<CreatedSandbox> {
        let limits = limits.unwrap_or(&self.settings.limits);
        let port = self.pool.allocate(owner.sandbox_id)?;

        match self.launch(owner, working_dir, limits, port).await {
            Ok(container_id) => {
                info!(
                    "Sandbox {} for project {} started in container {} on port {}",
                    owner.sandbox_id, owner.project_id, container_id, port
                );
                Ok(CreatedSandbox { container_id, port })
            }
            Err(e) => {
                self.pool.release(port, owner.sandbox_id);
                error!(
                    "Failed to create sandbox for project {}: {}",
                    owner.project_id, e
                );
                Err(SandboxError::SandboxCreationFailed(e.to_string()))
            }
        }
    }

    async fn launch(
        &self,
        owner: SandboxOwner<'_>,
        working_dir: &Path,
        limits: &ResourceLimits,
        port: u16,
    ) -> Result<String> {
        let host_path = tokio::fs::canonicalize(working_dir).await?;

        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SANDBOX_LABEL.to_string(), owner.sandbox_id.to_string()),
            (PROJECT_LABEL.to_string(), owner.project_id.to_string()),
            (OWNER_LABEL.to_string(), owner.owner_user_id.to_string()),
        ]);

        let config = ContainerConfig {
            image: self.settings.image.clone(),
            name: format!("sandpit-{}", owner.sandbox_id),
            user: self.settings.container_user.clone(),
            working_dir: self.settings.container_workdir.clone(),
            volumes: vec![VolumeMount {
                host_path: host_path.to_string_lossy().into_owned(),
                container_path: self.settings.container_workdir.clone(),
                readonly: false,
            }],
            ports: self.port_mappings(port),
            cpu_shares: limits.cpu_shares,
            memory_mb: limits.memory_mb,
            pids_limit: limits.pids_limit,
            command: Some(IDLE_COMMAND.iter().map(|s| s.to_string()).collect()),
            labels,
        };

        let container_id = self.runtime.create_container(&config).await?;
        if let Err(e) = self.runtime.start_container(&container_id).await {
            if let Err(cleanup) = self.runtime.remove_container(&container_id).await {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    container_id, cleanup
                );
            }
            return Err(e.into());
        }
        Ok(container_id)
    }

    /// Start a one-shot exec and hand back its lazy output stream.
    pub async fn exec_command(&self, container_id: &str, argv: Vec<String>) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(SandboxError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }
        Ok(self.runtime.exec(container_id, argv).await?)
    }

    /// Run `argv` to completion, handing every output chunk to `on_chunk`.
    /// Returns the exit code once the output stream has ended.
    pub async fn run_to_completion<F>(
        &self,
        container_id: &str,
        argv: Vec<String>,
        mut on_chunk: F,
    ) -> Result<Option<i64>>
    where
        F: FnMut(&OutputChunk) + Send,
    {
        let ExecOutput {
            exec_id,
            mut chunks,
        } = self.exec_command(container_id, argv).await?;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| SandboxError::ExecFailed(e.to_string()))?;
            on_chunk(&chunk);
        }

        let exit_code = self
            .runtime
            .exec_exit_code(&exec_id)
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;
        debug!("Exec {} finished with {:?}", exec_id, exit_code);
        Ok(exit_code)
    }

    /// Best-effort stop. Errors are logged and swallowed; the container
    /// removes itself once stopped.
    pub async fn stop_container(&self, container_id: &str) {
        if let Err(e) = self
            .runtime
            .stop_container(container_id, self.settings.stop_timeout_secs)
            .await
        {
            warn!("Failed to stop container {}: {}", container_id, e);
        }
    }

    /// Stop, then release the port leased to `sandbox_id`. The port is only
    /// freed after the stop attempt has completed.
    pub async fn stop_and_release(
        &self,
        sandbox_id: &str,
        container_id: Option<&str>,
        port: Option<u16>,
    ) {
        if let Some(container_id) = container_id {
            self.stop_container(container_id).await;
        }
        if let Some(port) = port {
            self.pool.release(port, sandbox_id);
        }
    }

    pub async fn open_shell(&self, container_id: &str) -> Result<ShellSession> {
        Ok(self
            .runtime
            .open_shell(container_id, self.settings.shell.clone())
            .await?)
    }

    pub async fn inspect(&self, container_id: &str) -> Result<ContainerInfo> {
        Ok(self.runtime.inspect_container(container_id).await?)
    }

    pub async fn metrics(&self, container_id: &str) -> Result<ContainerMetrics> {
        Ok(self.runtime.metrics(container_id).await?)
    }

    pub async fn list_managed(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self.runtime.list_managed().await?)
    }
}

