// ABOUTME: Shared test harness with an in-memory registry and a scripted container runtime
// ABOUTME: The fake runtime records every call so tests can assert ordering and counts

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use sandpit_sandbox::providers::{
    ContainerConfig, ContainerInfo, ContainerMetrics, ContainerRuntime, ContainerStatus,
    ExecOutput, OutputChunk, ProviderError, Result as ProviderResult, ShellSession, StreamType,
};
use sandpit_sandbox::{
    run_migrations, SandboxRegistry, SandboxSettings, Sandboxes, SqliteProjectStore,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::DuplexStream;

pub const PORT_START: u16 = 31000;
pub const PORT_END: u16 = 31009;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub config: ContainerConfig,
    pub running: bool,
}

/// Test-side ends of an interactive shell opened by the bridge.
pub struct ShellHandle {
    pub container_id: String,
    /// Push bytes (or end the stream by dropping) as the shell's output
    pub output: mpsc::UnboundedSender<ProviderResult<Vec<u8>>>,
    /// Read what the bridge wrote to the shell's stdin
    pub input: DuplexStream,
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    containers: HashMap<String, FakeContainer>,
    calls: Vec<String>,
    shells: Vec<ShellHandle>,
    shells_opened: usize,
    stop_delays: VecDeque<Duration>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make the next stops take `millis` each, in call order.
    pub fn delay_stops(&self, millis: &[u64]) {
        self.state
            .lock()
            .unwrap()
            .stop_delays
            .extend(millis.iter().map(|ms| Duration::from_millis(*ms)));
    }

    /// Every control call in order, e.g. `create:sandpit-sbx-…`, `stop:ctr-1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("create:"))
            .count()
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn running_containers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Kill a container behind the service's back.
    pub fn kill(&self, id: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.running = false;
        }
    }

    pub fn shells_opened(&self) -> usize {
        self.state.lock().unwrap().shells_opened
    }

    /// Wait until the bridge has opened a shell and take its test-side ends.
    pub async fn wait_for_shell(&self) -> ShellHandle {
        for _ in 0..500 {
            if let Some(handle) = self.state.lock().unwrap().shells.pop() {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("shell was never opened");
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn running(&self, id: &str) -> ProviderResult<()> {
        match self.state.lock().unwrap().containers.get(id) {
            Some(c) if c.running => Ok(()),
            _ => Err(ProviderError::NotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ProviderResult<String> {
        self.record(format!("create:{}", config.name));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProviderError::ImageError("pull failed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                config: config.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> ProviderResult<()> {
        self.record(format!("start:{}", container_id));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ProviderError::ContainerError("start failed".to_string()));
        }
        match self.state.lock().unwrap().containers.get_mut(container_id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(ProviderError::NotFound(container_id.to_string())),
        }
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> ProviderResult<()> {
        self.record(format!("stop:{}", container_id));
        let delay = self.state.lock().unwrap().stop_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        // auto-remove on stop
        self.state.lock().unwrap().containers.remove(container_id);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> ProviderResult<()> {
        self.record(format!("remove:{}", container_id));
        self.state.lock().unwrap().containers.remove(container_id);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> ProviderResult<ContainerInfo> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: container.config.name.clone(),
            status: if container.running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            },
            labels: container.config.labels.clone(),
        })
    }

    async fn list_managed(&self) -> ProviderResult<Vec<ContainerInfo>> {
        let ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .containers
            .keys()
            .cloned()
            .collect();
        let mut infos = Vec::new();
        for id in ids {
            infos.push(self.inspect_container(&id).await?);
        }
        Ok(infos)
    }

    async fn exec(&self, container_id: &str, command: Vec<String>) -> ProviderResult<ExecOutput> {
        self.record(format!("exec:{}:{}", container_id, command.join(" ")));
        self.running(container_id)?;

        let mut chunks = vec![Ok(OutputChunk {
            stream: StreamType::Stdout,
            data: format!("{}\n", command[1..].join(" ")).into_bytes(),
        })];
        if command[0] == "fail" {
            chunks.push(Ok(OutputChunk {
                stream: StreamType::Stderr,
                data: b"boom\n".to_vec(),
            }));
        }
        Ok(ExecOutput {
            exec_id: format!("exec-{}", command[0]),
            chunks: stream::iter(chunks).boxed(),
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> ProviderResult<Option<i64>> {
        Ok(Some(if exec_id == "exec-fail" { 1 } else { 0 }))
    }

    async fn open_shell(
        &self,
        container_id: &str,
        _command: Vec<String>,
    ) -> ProviderResult<ShellSession> {
        self.record(format!("shell:{}", container_id));
        self.running(container_id)?;

        let (output_tx, output_rx) = mpsc::unbounded();
        let (bridge_side, test_side) = tokio::io::duplex(4096);

        let mut state = self.state.lock().unwrap();
        state.shells_opened += 1;
        state.shells.push(ShellHandle {
            container_id: container_id.to_string(),
            output: output_tx,
            input: test_side,
        });

        Ok(ShellSession {
            output: output_rx.boxed(),
            input: Box::pin(bridge_side),
        })
    }

    async fn metrics(&self, container_id: &str) -> ProviderResult<ContainerMetrics> {
        self.running(container_id)?;
        Ok(ContainerMetrics {
            cpu_usage_percent: 1.5,
            memory_usage_mb: 42,
            memory_limit_mb: 512,
        })
    }
}

pub struct Harness {
    pub sandboxes: Sandboxes,
    pub registry: SandboxRegistry,
    pub store: SqliteProjectStore,
    pub fake: Arc<FakeRuntime>,
    pub workspace: TempDir,
}

pub fn test_settings(workspace: &TempDir) -> SandboxSettings {
    SandboxSettings {
        workspace_root: workspace.path().to_path_buf(),
        port_range_start: PORT_START,
        port_range_end: PORT_END,
        probe_host_ports: false,
        ..Default::default()
    }
}

/// Registry and project store over one in-memory database. Users `u1` and
/// `u2` are members of `p1`, `p2` and `p3`; each project has two files.
pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(customize: impl FnOnce(&mut SandboxSettings)) -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    let store = SqliteProjectStore::new(pool.clone());
    for project in ["p1", "p2", "p3"] {
        for user in ["u1", "u2"] {
            store.add_member(project, user).await.unwrap();
        }
        store
            .put_file(project, "index.js", format!("// {}\n", project).as_bytes())
            .await
            .unwrap();
        store
            .put_file(project, "src/lib/util.js", b"module.exports = 1;\n")
            .await
            .unwrap();
    }

    let workspace = TempDir::new().unwrap();
    let mut settings = test_settings(&workspace);
    customize(&mut settings);

    let registry = SandboxRegistry::new(pool);
    let fake = FakeRuntime::new();
    let sandboxes = Sandboxes::new(
        settings,
        registry.clone(),
        fake.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );

    Harness {
        sandboxes,
        registry,
        store,
        fake,
        workspace,
    }
}

pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
