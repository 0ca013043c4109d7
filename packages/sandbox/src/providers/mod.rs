// ABOUTME: Container runtime trait and shared types for sandbox backends
// ABOUTME: Defines the control API (create/start/stop/exec/inspect/stats) addressed by container id

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Exec error: {0}")]
    ExecError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Everything the runtime needs to create one sandbox container
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub user: String,
    pub working_dir: String,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub cpu_shares: i64,
    pub memory_mb: u64,
    pub pids_limit: i64,
    pub command: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Removing,
    Dead,
    Unknown(String),
}

/// Live view of a container as reported by the runtime
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ContainerMetrics {
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: u64,
    pub memory_limit_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    pub stream: StreamType,
    pub data: Vec<u8>,
}

/// Lazy, finite sequence of output chunks from a one-shot exec.
///
/// The stream ends when the command's output closes; the exit code is fetched
/// separately through [`ContainerRuntime::exec_exit_code`].
pub struct ExecOutput {
    pub exec_id: String,
    pub chunks: BoxStream<'static, Result<OutputChunk>>,
}

/// An interactive TTY exec channel. Dropping or shutting down `input` closes
/// the shell's stdin; `output` ends when the shell process exits.
pub struct ShellSession {
    pub output: BoxStream<'static, Result<Vec<u8>>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Control API of the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container (pulling the image if needed). Does not start it.
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a container; an already-stopped container is not an error.
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Force-remove a container; an already-removed container is not an error.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerInfo>;

    /// Containers carrying the management label, running or not.
    async fn list_managed(&self) -> Result<Vec<ContainerInfo>>;

    /// Start a one-shot, non-interactive exec and return its output stream.
    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<ExecOutput>;

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>>;

    /// Open an interactive pseudo-terminal running `command`.
    async fn open_shell(&self, container_id: &str, command: Vec<String>) -> Result<ShellSession>;

    async fn metrics(&self, container_id: &str) -> Result<ContainerMetrics>;
}
