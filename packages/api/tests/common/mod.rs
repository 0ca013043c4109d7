// ABOUTME: Test app wiring the router to an in-memory store and a stub container runtime
// ABOUTME: The stub starts every container and echoes exec arguments back on stdout

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sandpit_api::{create_router, AppState};
use sandpit_sandbox::providers::{
    ContainerConfig, ContainerInfo, ContainerMetrics, ContainerRuntime, ContainerStatus,
    ExecOutput, OutputChunk, ProviderError, Result as ProviderResult, ShellSession, StreamType,
};
use sandpit_sandbox::{run_migrations, SandboxRegistry, SandboxSettings, Sandboxes, SqliteProjectStore};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
pub struct StubRuntime {
    containers: Mutex<HashMap<String, ContainerConfig>>,
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ProviderResult<String> {
        let mut containers = self.containers.lock().unwrap();
        let id = format!("ctr-{}", containers.len() + 1);
        containers.insert(id.clone(), config.clone());
        Ok(id)
    }

    async fn start_container(&self, _container_id: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> ProviderResult<()> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> ProviderResult<()> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> ProviderResult<ContainerInfo> {
        let containers = self.containers.lock().unwrap();
        let config = containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: config.name.clone(),
            status: ContainerStatus::Running,
            labels: config.labels.clone(),
        })
    }

    async fn list_managed(&self) -> ProviderResult<Vec<ContainerInfo>> {
        Ok(Vec::new())
    }

    async fn exec(&self, _container_id: &str, command: Vec<String>) -> ProviderResult<ExecOutput> {
        let chunk = OutputChunk {
            stream: StreamType::Stdout,
            data: format!("{}\n", command[1..].join(" ")).into_bytes(),
        };
        Ok(ExecOutput {
            exec_id: "exec-1".to_string(),
            chunks: stream::iter(vec![Ok(chunk)]).boxed(),
        })
    }

    async fn exec_exit_code(&self, _exec_id: &str) -> ProviderResult<Option<i64>> {
        Ok(Some(0))
    }

    async fn open_shell(
        &self,
        _container_id: &str,
        _command: Vec<String>,
    ) -> ProviderResult<ShellSession> {
        Err(ProviderError::ExecError("no tty in tests".to_string()))
    }

    async fn metrics(&self, _container_id: &str) -> ProviderResult<ContainerMetrics> {
        Ok(ContainerMetrics {
            cpu_usage_percent: 0.0,
            memory_usage_mb: 10,
            memory_limit_mb: 512,
        })
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub workspace: TempDir,
}

/// Tokens `tok-u1` / `tok-u2`; only `u1` is a member of `p1`.
pub async fn test_app() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    let store = SqliteProjectStore::new(pool.clone());
    store.create_session("tok-u1", "u1", None).await.unwrap();
    store.create_session("tok-u2", "u2", None).await.unwrap();
    store.add_member("p1", "u1").await.unwrap();
    store.put_file("p1", "index.js", b"console.log(1)").await.unwrap();

    let workspace = TempDir::new().unwrap();
    let settings = SandboxSettings {
        workspace_root: workspace.path().to_path_buf(),
        port_range_start: 32000,
        port_range_end: 32004,
        probe_host_ports: false,
        ..Default::default()
    };

    let sandboxes = Sandboxes::new(
        settings,
        SandboxRegistry::new(pool),
        Arc::new(StubRuntime::default()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    let state = AppState::new(Arc::new(sandboxes), Arc::new(store));

    TestApp {
        router: create_router(state),
        workspace,
    }
}
