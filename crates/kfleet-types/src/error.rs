//! [`FleetError`] – everything that can go wrong while supervising kernels.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error taxonomy shared by the supervisor, the management API and the CLI.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("kernel binary '{name}' not found ({} location(s) searched)", .searched.len())]
    BinaryNotFound { name: String, searched: Vec<PathBuf> },

    #[error("kernel launcher exited with {status}: {stderr}")]
    LaunchFailed { status: String, stderr: String },

    #[error("PID file {} not written after {attempts} attempt(s)", .path.display())]
    PidFileTimeout { path: PathBuf, attempts: u32 },

    #[error("kernel on port {port} not accepting connections after {:.1}s", .timeout.as_secs_f64())]
    PortReadyTimeout { port: u16, timeout: Duration },

    #[error("kernel process {pid} exited before becoming ready")]
    KernelExited { pid: u32 },

    #[error("no free port in range {start}..{upper}")]
    PortExhausted { start: u16, upper: u16 },

    /// Swallowed by the spawn path unless strict limits are configured.
    #[error("could not apply resource limits to PID {pid}: {reason}")]
    ResourceLimitApplyFailure { pid: u32, reason: String },

    #[error("kernel {0} not found")]
    KernelNotFound(String),

    /// Stopping a process that is already gone counts as success.
    #[error("process {0} has already exited")]
    ProcessAlreadyDead(u32),

    #[error("failed to stop kernel {id} (PID {pid}): {reason}")]
    StopFailed { id: String, pid: u32, reason: String },

    #[error("registry at {} is corrupt: {reason}", .path.display())]
    RegistryCorrupt { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::BinaryNotFound { .. } => "binary_not_found",
            FleetError::LaunchFailed { .. } => "launch_failed",
            FleetError::PidFileTimeout { .. } => "pid_file_timeout",
            FleetError::PortReadyTimeout { .. } => "port_ready_timeout",
            FleetError::KernelExited { .. } => "kernel_exited",
            FleetError::PortExhausted { .. } => "port_exhausted",
            FleetError::ResourceLimitApplyFailure { .. } => "resource_limit_apply_failure",
            FleetError::KernelNotFound(_) => "kernel_not_found",
            FleetError::ProcessAlreadyDead(_) => "process_already_dead",
            FleetError::StopFailed { .. } => "stop_failed",
            FleetError::RegistryCorrupt { .. } => "registry_corrupt",
            FleetError::Cancelled => "cancelled",
            FleetError::Io(_) => "io",
        }
    }
}
