//! Command-line surface of the `kfleet` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kfleet_types::{DEFAULT_CONFIG, DEFAULT_LANGUAGE, SpawnRequest};

/// Supervise a local fleet of long-running kernel processes.
#[derive(Debug, Parser)]
#[command(name = "kfleet", version, about, long_about = None)]
pub struct Cli {
    /// Fleet directory (registry, PID files, descriptors, logs)
    #[arg(long, global = true, value_name = "DIR")]
    pub fleet_dir: Option<PathBuf>,

    /// Configuration file [default: ~/.kfleet/config.toml]
    #[arg(long, global = true, env = "KFLEET_CONFIG", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch a new kernel and register it
    Spawn(KernelArgs),

    /// Reap dead kernels, then list the live ones
    #[command(alias = "ls")]
    List {
        /// Show paths, limits and environment overrides
        #[arg(short, long)]
        verbose: bool,
    },

    /// Stop one kernel by id or port
    Stop {
        /// Kernel id (`kernel-1a2b3c4d`) or port
        target: String,

        /// Skip the graceful period and send SIGKILL at once
        #[arg(short, long)]
        force: bool,
    },

    /// Stop every registered kernel
    StopAll {
        #[arg(short, long)]
        force: bool,
    },

    /// Remove registry entries whose process has died
    Cleanup,

    /// Reuse a live kernel for a language/config pair, or spawn one
    Find(KernelArgs),

    /// Sample CPU, memory, threads and sockets of every kernel
    Metrics {
        #[arg(long, value_enum, default_value_t = MetricsFormat::Text)]
        format: MetricsFormat,
    },

    /// Dump the raw registry as JSON
    Registry,

    /// Run the HTTP / WebSocket management API
    Serve {
        /// Listening port [default: api_port from the config file]
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Workload shape shared by `spawn` and `find`.
#[derive(Debug, Clone, Args)]
pub struct KernelArgs {
    #[arg(short, long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Named config under `configs_dir`, or a path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: String,

    /// Memory ceiling, e.g. `512M` or `2G`
    #[arg(long)]
    pub memory: Option<String>,

    /// CPU ceiling as a fraction of one core, e.g. `0.5`
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Extra environment for the kernel (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

impl KernelArgs {
    pub fn to_request(&self) -> SpawnRequest {
        SpawnRequest {
            language: self.language.clone(),
            config: self.config.clone(),
            memory_limit: self.memory.clone(),
            cpu_limit: self.cpu,
            env: self.env.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricsFormat {
    /// Human-readable summary
    Text,
    Json,
    /// Prometheus exposition format
    Prometheus,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
