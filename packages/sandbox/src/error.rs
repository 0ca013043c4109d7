// ABOUTME: Error types for sandbox orchestration
// ABOUTME: Folds pool, storage, provider and filesystem failures into one taxonomy

use crate::pool::PoolError;
use crate::providers::ProviderError;
use crate::storage::StorageError;
use thiserror::Error;

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// No free host port block left in the pool
    #[error("Port pool exhausted: {0}")]
    PoolExhausted(#[from] PoolError),

    /// Runtime failed to create or start the container; any leased port has
    /// already been released when this is returned
    #[error("Sandbox creation failed: {0}")]
    SandboxCreationFailed(String),

    /// A registry record exists but has no live container handle
    #[error("Sandbox {0} has no live container")]
    ContainerUnavailable(String),

    /// Caller is authenticated but not allowed to touch the project
    #[error("Access to project {0} is forbidden")]
    Forbidden(String),

    /// Session token missing or unknown
    #[error("Authentication required")]
    Unauthenticated,

    /// Command vector was empty
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Relative path or project id would escape the workspace root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Command execution failed after the sandbox was running
    #[error("Execution failed: {0}")]
    ExecFailed(String),

    /// Registry persistence error
    #[error("Registry error: {0}")]
    Storage(#[from] StorageError),

    /// Runtime control API error outside of creation
    #[error("Runtime error: {0}")]
    Provider(#[from] ProviderError),

    /// Filesystem error while materializing files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
