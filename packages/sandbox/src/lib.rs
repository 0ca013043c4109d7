// ABOUTME: Sandbox orchestration for project dev environments
// ABOUTME: Port leasing, file materialization, container lifecycle, terminal bridging and reclamation

pub mod error;
pub mod locks;
pub mod materializer;
pub mod pool;
pub mod project;
pub mod providers;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod storage;
pub mod sweeper;
pub mod terminal;

pub use error::{Result, SandboxError};
pub use materializer::FileMaterializer;
pub use pool::{PoolError, PortPool};
pub use project::{IdentityProvider, ProjectAccess, ProjectFile, ProjectFiles, SqliteProjectStore};
pub use providers::{ContainerRuntime, DockerRuntime, ProviderError};
pub use runtime::{CreatedSandbox, SandboxOwner, SandboxRuntime};
pub use service::{ReconcileReport, RunResult, RunService, SandboxView};
pub use settings::{ConfigError, ResourceLimits, SandboxSettings};
pub use storage::{run_migrations, Sandbox, SandboxRegistry, SandboxStatus, StorageError};
pub use sweeper::{Eviction, EvictionReason, Sweeper};
pub use terminal::{BridgeOutcome, TerminalBridge};

use std::sync::Arc;

/// The wired-up subsystem shared by the HTTP layer and the binary.
pub struct Sandboxes {
    pub settings: Arc<SandboxSettings>,
    pub service: Arc<RunService>,
    pub terminal: Arc<TerminalBridge>,
    pub sweeper: Arc<Sweeper>,
}

impl Sandboxes {
    /// Build every component around one port pool and one registry.
    pub fn new(
        settings: SandboxSettings,
        registry: SandboxRegistry,
        container_runtime: Arc<dyn ContainerRuntime>,
        access: Arc<dyn ProjectAccess>,
        files: Arc<dyn ProjectFiles>,
    ) -> Self {
        let settings = Arc::new(settings);
        let pool = Arc::new(
            PortPool::with_block_size(
                settings.port_range_start,
                settings.port_range_end,
                settings.dev_ports.len() as u16,
            )
            .probe_host_ports(settings.probe_host_ports),
        );
        let runtime = Arc::new(SandboxRuntime::new(
            container_runtime,
            pool,
            settings.clone(),
        ));
        let service = Arc::new(RunService::new(
            registry.clone(),
            runtime.clone(),
            FileMaterializer::new(settings.workspace_root.clone()),
            access,
            files,
        ));
        let terminal = Arc::new(TerminalBridge::new(
            service.clone(),
            settings.activity_touch_interval,
        ));
        let sweeper = Arc::new(Sweeper::new(
            registry,
            runtime,
            settings.idle_timeout,
            settings.max_lifetime,
            settings.sweep_interval,
        ));

        Self {
            settings,
            service,
            terminal,
            sweeper,
        }
    }
}
