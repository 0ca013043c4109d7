// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Sandpit

// Server Configuration
pub const SANDPIT_API_HOST: &str = "SANDPIT_API_HOST";
pub const SANDPIT_API_PORT: &str = "SANDPIT_API_PORT";
pub const PORT: &str = "PORT"; // Legacy
pub const SANDPIT_DATABASE_URL: &str = "SANDPIT_DATABASE_URL";
pub const DATABASE_URL: &str = "DATABASE_URL"; // Legacy

// Sandbox Workspace
pub const SANDPIT_WORKSPACE_ROOT: &str = "SANDPIT_WORKSPACE_ROOT";
pub const SANDPIT_IMAGE: &str = "SANDPIT_IMAGE";
pub const SANDPIT_SHELL: &str = "SANDPIT_SHELL";
pub const SANDPIT_CONTAINER_USER: &str = "SANDPIT_CONTAINER_USER";
pub const SANDPIT_CONTAINER_WORKDIR: &str = "SANDPIT_CONTAINER_WORKDIR";

// Port Pool
pub const SANDPIT_PORT_RANGE_START: &str = "SANDPIT_PORT_RANGE_START";
pub const SANDPIT_PORT_RANGE_END: &str = "SANDPIT_PORT_RANGE_END";
pub const SANDPIT_DEV_PORTS: &str = "SANDPIT_DEV_PORTS";
pub const SANDPIT_PROBE_HOST_PORTS: &str = "SANDPIT_PROBE_HOST_PORTS";

// Resource Limits
pub const SANDPIT_CPU_SHARES: &str = "SANDPIT_CPU_SHARES";
pub const SANDPIT_MEMORY_MB: &str = "SANDPIT_MEMORY_MB";
pub const SANDPIT_PIDS_LIMIT: &str = "SANDPIT_PIDS_LIMIT";

// Reclamation
pub const SANDPIT_IDLE_TIMEOUT_SECS: &str = "SANDPIT_IDLE_TIMEOUT_SECS";
pub const SANDPIT_MAX_LIFETIME_SECS: &str = "SANDPIT_MAX_LIFETIME_SECS";
pub const SANDPIT_SWEEP_INTERVAL_SECS: &str = "SANDPIT_SWEEP_INTERVAL_SECS";
pub const SANDPIT_STOP_TIMEOUT_SECS: &str = "SANDPIT_STOP_TIMEOUT_SECS";
pub const SANDPIT_ACTIVITY_TOUCH_SECS: &str = "SANDPIT_ACTIVITY_TOUCH_SECS";
pub const SANDPIT_IMAGE_PULL_TIMEOUT_SECS: &str = "SANDPIT_IMAGE_PULL_TIMEOUT_SECS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
