// ABOUTME: Run service orchestrating start-or-reuse of a project's sandbox and command execution
// ABOUTME: Enforces one live sandbox per owner and per project, plus startup reconciliation

use crate::error::{Result, SandboxError};
use crate::locks::KeyedLocks;
use crate::materializer::FileMaterializer;
use crate::project::{ProjectAccess, ProjectFiles};
use crate::providers::{ContainerMetrics, OutputChunk, StreamType};
use crate::runtime::{SandboxOwner, SandboxRuntime};
use crate::storage::{Sandbox, SandboxRegistry, SandboxStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one `run_command` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub sandbox_id: String,
    pub port: Option<u16>,
    pub exit_code: Option<i64>,
}

/// Registry record enriched with live runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxView {
    pub sandbox_id: String,
    pub project_id: String,
    pub container_id: Option<String>,
    pub port: Option<u16>,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// `None` when the runtime could not be asked
    pub container_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ContainerMetrics>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub adopted: usize,
    pub removed: usize,
    pub orphans_stopped: usize,
}

pub struct RunService {
    registry: SandboxRegistry,
    runtime: Arc<SandboxRuntime>,
    materializer: FileMaterializer,
    access: Arc<dyn ProjectAccess>,
    files: Arc<dyn ProjectFiles>,
    locks: KeyedLocks,
}

impl RunService {
    pub fn new(
        registry: SandboxRegistry,
        runtime: Arc<SandboxRuntime>,
        materializer: FileMaterializer,
        access: Arc<dyn ProjectAccess>,
        files: Arc<dyn ProjectFiles>,
    ) -> Self {
        Self {
            registry,
            runtime,
            materializer,
            access,
            files,
            locks: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<SandboxRuntime> {
        &self.runtime
    }

    pub async fn authorize(&self, project_id: &str, user_id: &str) -> Result<()> {
        if self.access.can_access(project_id, user_id).await? {
            Ok(())
        } else {
            Err(SandboxError::Forbidden(project_id.to_string()))
        }
    }

    /// Start or reuse the caller's sandbox for `project_id` and run `argv` in it.
    pub async fn run_command(
        &self,
        owner_user_id: &str,
        project_id: &str,
        argv: Vec<String>,
    ) -> Result<RunResult> {
        self.run_command_with_output(owner_user_id, project_id, argv, |_| {})
            .await
    }

    /// Like [`run_command`](Self::run_command), also handing each output chunk
    /// to `on_chunk` as it arrives.
    pub async fn run_command_with_output<F>(
        &self,
        owner_user_id: &str,
        project_id: &str,
        argv: Vec<String>,
        mut on_chunk: F,
    ) -> Result<RunResult>
    where
        F: FnMut(&OutputChunk) + Send,
    {
        if argv.is_empty() {
            return Err(SandboxError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }
        self.authorize(project_id, owner_user_id).await?;

        let sandbox = self.acquire(owner_user_id, project_id).await?;
        let container_id = sandbox
            .container_id
            .as_deref()
            .ok_or_else(|| SandboxError::ContainerUnavailable(sandbox.id.clone()))?;

        info!(
            "Running {:?} in sandbox {} for project {}",
            argv, sandbox.id, project_id
        );
        let exit_code = self
            .runtime
            .run_to_completion(container_id, argv, |chunk| {
                let text = String::from_utf8_lossy(&chunk.data);
                match chunk.stream {
                    StreamType::Stdout => debug!(sandbox_id = %sandbox.id, "stdout: {}", text.trim_end()),
                    StreamType::Stderr => debug!(sandbox_id = %sandbox.id, "stderr: {}", text.trim_end()),
                }
                on_chunk(chunk);
            })
            .await?;

        self.registry.touch(&sandbox.id, Utc::now()).await?;

        Ok(RunResult {
            sandbox_id: sandbox.id,
            port: sandbox.port,
            exit_code,
        })
    }

    /// Return the owner's live sandbox for `project_id`, preempting any other
    /// sandbox the owner holds and creating one if needed.
    async fn acquire(&self, owner_user_id: &str, project_id: &str) -> Result<Sandbox> {
        // Always owner first, then project
        let _owner_guard = self.locks.lock(&format!("owner:{}", owner_user_id)).await;
        let _project_guard = self.locks.lock(&format!("project:{}", project_id)).await;

        if let Some(existing) = self.registry.get_by_owner(owner_user_id).await? {
            if existing.project_id != project_id {
                info!(
                    "Preempting sandbox {} of project {} for owner {}",
                    existing.id, existing.project_id, owner_user_id
                );
                self.teardown(&existing).await?;
            }
        }

        if let Some(current) = self.registry.get_by_project(project_id).await? {
            if current.owner_user_id == owner_user_id
                && current.container_id.is_some()
                && current.status != SandboxStatus::Stopping
            {
                debug!("Reusing sandbox {} for project {}", current.id, project_id);
                return Ok(current);
            }
            if current.status == SandboxStatus::Stopping {
                debug!(
                    "Sandbox {} of project {} is already stopping",
                    current.id, project_id
                );
            } else if current.owner_user_id != owner_user_id {
                info!(
                    "Replacing sandbox {} of project {} owned by {}",
                    current.id, project_id, current.owner_user_id
                );
            } else {
                warn!("Discarding stale sandbox record {}", current.id);
            }
            self.teardown(&current).await?;
        }

        self.create_for(owner_user_id, project_id).await
    }

    async fn create_for(&self, owner_user_id: &str, project_id: &str) -> Result<Sandbox> {
        let files = self.files.list_files(project_id).await?;
        let working_dir = self.materializer.sync_all(project_id, &files).await?;

        let mut sandbox = Sandbox::new(project_id, owner_user_id, Utc::now());
        let created = self
            .runtime
            .create_sandbox(
                SandboxOwner {
                    sandbox_id: &sandbox.id,
                    project_id,
                    owner_user_id,
                },
                &working_dir,
                None,
            )
            .await?;

        sandbox.container_id = Some(created.container_id);
        sandbox.port = Some(created.port);
        sandbox.status = SandboxStatus::Running;
        sandbox.last_activity_at = Utc::now();

        if let Err(e) = self.registry.create(&sandbox).await {
            self.runtime
                .stop_and_release(&sandbox.id, sandbox.container_id.as_deref(), sandbox.port)
                .await;
            return Err(e.into());
        }
        Ok(sandbox)
    }

    async fn teardown(&self, sandbox: &Sandbox) -> Result<bool> {
        let reclaimed = reclaim(&self.registry, &self.runtime, sandbox).await?;
        if reclaimed {
            info!(
                "Tore down sandbox {} for project {}",
                sandbox.id, sandbox.project_id
            );
        }
        Ok(reclaimed)
    }

    /// Explicitly stop the sandbox of `project_id`. Returns whether this call
    /// stopped one.
    pub async fn stop_project(&self, user_id: &str, project_id: &str) -> Result<bool> {
        self.authorize(project_id, user_id).await?;

        let _owner_guard = self.locks.lock(&format!("owner:{}", user_id)).await;
        let _project_guard = self.locks.lock(&format!("project:{}", project_id)).await;

        match self.registry.get_by_project(project_id).await? {
            Some(sandbox) => self.teardown(&sandbox).await,
            None => Ok(false),
        }
    }

    /// Introspect the sandbox of `project_id`, or `None` when absent.
    pub async fn status(&self, user_id: &str, project_id: &str) -> Result<Option<SandboxView>> {
        self.authorize(project_id, user_id).await?;

        let Some(sandbox) = self.registry.get_by_project(project_id).await? else {
            return Ok(None);
        };

        let (container_running, metrics) = match sandbox.container_id.as_deref() {
            Some(container_id) => {
                let running = match self.runtime.inspect(container_id).await {
                    Ok(info) => Some(info.is_running()),
                    Err(e) => {
                        debug!("Inspect of {} failed: {}", container_id, e);
                        None
                    }
                };
                let metrics = if running == Some(true) {
                    self.runtime.metrics(container_id).await.ok()
                } else {
                    None
                };
                (running, metrics)
            }
            None => (Some(false), None),
        };

        Ok(Some(SandboxView {
            sandbox_id: sandbox.id,
            project_id: sandbox.project_id,
            container_id: sandbox.container_id,
            port: sandbox.port,
            status: sandbox.status,
            created_at: sandbox.created_at,
            last_activity_at: sandbox.last_activity_at,
            container_running,
            metrics,
        }))
    }

    /// The project's sandbox for an interactive session. A sandbox being torn
    /// down counts as absent; a record without a container handle is reported
    /// as `ContainerUnavailable`.
    pub async fn live_sandbox(&self, project_id: &str) -> Result<Option<Sandbox>> {
        match self.registry.get_by_project(project_id).await? {
            Some(sandbox) if sandbox.status == SandboxStatus::Stopping => Ok(None),
            Some(sandbox) if sandbox.container_id.is_none() => {
                Err(SandboxError::ContainerUnavailable(sandbox.id))
            }
            other => Ok(other),
        }
    }

    /// Bring the registry, the port pool and the runtime back in line after a
    /// restart. Failures on individual records are logged, not returned.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut known = HashSet::new();

        for sandbox in self.registry.list_all().await? {
            let alive = match sandbox.container_id.as_deref() {
                _ if sandbox.status == SandboxStatus::Stopping => false,
                Some(container_id) => match self.runtime.inspect(container_id).await {
                    Ok(info) => info.is_running(),
                    Err(e) => {
                        debug!("Container {} of {} is gone: {}", container_id, sandbox.id, e);
                        false
                    }
                },
                None => false,
            };

            if alive {
                if let Some(port) = sandbox.port {
                    if !self.runtime.pool().reserve(port, &sandbox.id) {
                        warn!(
                            "Port {} of sandbox {} could not be re-reserved",
                            port, sandbox.id
                        );
                    }
                }
                if let Some(container_id) = sandbox.container_id {
                    known.insert(container_id);
                }
                report.adopted += 1;
            } else {
                // Leftover `stopping` rows have no live owner after a restart
                if sandbox.status != SandboxStatus::Stopping
                    && !self.registry.mark_stopping(&sandbox.id).await?
                {
                    continue;
                }
                self.runtime
                    .stop_and_release(&sandbox.id, sandbox.container_id.as_deref(), sandbox.port)
                    .await;
                match self.registry.delete(&sandbox.id).await {
                    Ok(_) => report.removed += 1,
                    Err(e) => warn!("Failed to delete stale sandbox {}: {}", sandbox.id, e),
                }
            }
        }

        match self.runtime.list_managed().await {
            Ok(containers) => {
                for container in containers {
                    if container.is_running() && !known.contains(&container.id) {
                        info!("Stopping orphaned container {}", container.name);
                        self.runtime.stop_container(&container.id).await;
                        report.orphans_stopped += 1;
                    }
                }
            }
            Err(e) => warn!("Failed to list managed containers: {}", e),
        }

        info!(
            "Reconciled sandboxes: {} adopted, {} removed, {} orphans stopped",
            report.adopted, report.removed, report.orphans_stopped
        );
        Ok(report)
    }
}

/// Tear down `sandbox` if no one else is already doing so: claim the record by
/// marking it `stopping`, stop the container, release its port, then delete
/// the row. Returns `false` when another caller holds the claim or the record
/// is already gone.
pub(crate) async fn reclaim(
    registry: &SandboxRegistry,
    runtime: &SandboxRuntime,
    sandbox: &Sandbox,
) -> Result<bool> {
    if !registry.mark_stopping(&sandbox.id).await? {
        debug!("Sandbox {} is already being torn down", sandbox.id);
        return Ok(false);
    }
    runtime
        .stop_and_release(&sandbox.id, sandbox.container_id.as_deref(), sandbox.port)
        .await;
    registry.delete(&sandbox.id).await?;
    Ok(true)
}
