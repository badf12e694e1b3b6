//! [`SupervisorConfig`] – every budget, path and policy knob of the supervisor.
//!
//! All fields have defaults, so an empty `[supervisor]` table (or none at
//! all) in the operator's config file yields a working supervisor.

use std::path::PathBuf;
use std::time::Duration;

use kfleet_types::{DEFAULT_BASE_PORT, DEFAULT_CONFIG};
use serde::{Deserialize, Serialize};

use crate::wait::WaitBudget;

/// Tunables for spawning, stopping and sampling kernels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Port cursor of a freshly created registry.
    pub base_port: u16,
    /// Exclusive upper bound of the port scan.
    pub port_upper_bound: u16,

    /// Kernel executable name, looked up on `PATH` first.
    pub kernel_binary: String,
    /// Arguments placed before the daemon flags (`llmspell kernel start …`).
    pub kernel_args: Vec<String>,
    /// Directories searched after `PATH`.
    pub binary_search_paths: Vec<PathBuf>,
    /// Where named kernel configs live.
    pub configs_dir: PathBuf,
    /// Config name that is never forwarded to the kernel.
    pub default_config: String,

    pub pid_file_attempts: u32,
    pub pid_file_interval_ms: u64,
    pub ready_timeout_secs: u64,
    pub ready_interval_ms: u64,
    pub stop_timeout_secs: u64,
    pub kill_timeout_secs: u64,
    pub cpu_sample_interval_ms: u64,

    /// Abort the spawn when resource limits cannot be applied.
    pub strict_limits: bool,
    pub cgroup_root: PathBuf,
    pub cgroup_group: String,

    pub alerts: AlertThresholds,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            port_upper_bound: 10_000,
            kernel_binary: "llmspell".to_string(),
            kernel_args: vec!["kernel".to_string(), "start".to_string()],
            binary_search_paths: vec![
                PathBuf::from("../../target/release"),
                PathBuf::from("../../target/debug"),
            ],
            configs_dir: PathBuf::from("configs"),
            default_config: DEFAULT_CONFIG.to_string(),
            pid_file_attempts: 10,
            pid_file_interval_ms: 100,
            ready_timeout_secs: 15,
            ready_interval_ms: 500,
            stop_timeout_secs: 5,
            kill_timeout_secs: 2,
            cpu_sample_interval_ms: 100,
            strict_limits: false,
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            cgroup_group: "kfleet".to_string(),
            alerts: AlertThresholds::default(),
        }
    }
}

// Polling cadence while waiting for a signalled process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl SupervisorConfig {
    pub fn pid_file_budget(&self) -> WaitBudget {
        WaitBudget::attempts(
            self.pid_file_attempts,
            Duration::from_millis(self.pid_file_interval_ms),
        )
    }

    pub fn ready_budget(&self) -> WaitBudget {
        WaitBudget::new(
            Duration::from_secs(self.ready_timeout_secs),
            Duration::from_millis(self.ready_interval_ms),
        )
    }

    pub fn stop_budget(&self) -> WaitBudget {
        WaitBudget::new(Duration::from_secs(self.stop_timeout_secs), EXIT_POLL_INTERVAL)
    }

    pub fn kill_budget(&self) -> WaitBudget {
        WaitBudget::new(Duration::from_secs(self.kill_timeout_secs), EXIT_POLL_INTERVAL)
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_interval_ms)
    }
}

/// Thresholds above which the metrics summary raises an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub uptime_hours: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            memory_mb: 1000.0,
            cpu_percent: 80.0,
            uptime_hours: 24.0,
        }
    }
}
