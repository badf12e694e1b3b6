//! Kernel records and the registry aggregate.
//!
//! The JSON layout is the on-disk contract shared with the dashboard and
//! any other reader of `registry.json`:
//!
//! ```json
//! { "kernels": [ { "id": "kernel-1a2b3c4d", "pid": 4242, "port": 9555, … } ],
//!   "nextPort": 9556,
//!   "totalSpawned": 1 }
//! ```
//!
//! Older registries written with snake_case keys (`next_port`,
//! `connection_file`, …) are still accepted on load.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DEFAULT_BASE_PORT, DEFAULT_CONFIG, DEFAULT_LANGUAGE};

// ─────────────────────────────────────────────────────────────────────────────
// KernelStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Last-known state of a kernel, captured at spawn time.
///
/// This is a cached projection, not a live field: a record can say
/// `Running` long after its process died.  Callers that need the truth must
/// reap or probe the PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    #[default]
    Running,
    /// Any status string this version does not know about.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelStatus::Running => write!(f, "running"),
            KernelStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// KernelRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One managed kernel process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelRecord {
    /// Opaque identifier (`kernel-<8 hex>`), immutable.
    pub id: String,
    /// PID of the daemonized kernel, read back from its PID file.
    pub pid: u32,
    /// TCP port the kernel listens on.
    pub port: u16,
    pub language: String,
    pub config: String,
    /// Connection descriptor written by the kernel once ready.
    #[serde(alias = "connection_file")]
    pub connection_descriptor: PathBuf,
    #[serde(alias = "log_file")]
    pub log_path: PathBuf,
    #[serde(alias = "started_at")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub status: KernelStatus,
    /// Requested memory ceiling, e.g. `"512M"`.
    #[serde(default, alias = "memory_limit")]
    pub memory_limit: Option<String>,
    /// Requested CPU ceiling as a fraction of one core (`0.5` = 50 %).
    #[serde(default, alias = "cpu_limit")]
    pub cpu_limit: Option<f64>,
    /// Environment overrides the kernel was launched with.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl KernelRecord {
    /// Generate a fresh kernel identifier.
    pub fn generate_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("kernel-{}", &hex[..8])
    }

    /// `true` when this record serves the given workload shape.
    pub fn matches(&self, language: &str, config: &str) -> bool {
        self.language == language && self.config == config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// The aggregate root persisted in `registry.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    #[serde(default)]
    pub kernels: Vec<KernelRecord>,
    /// Where the next port scan starts.
    #[serde(default = "default_next_port", alias = "next_port")]
    pub next_port: u16,
    /// Kernels ever registered.  Never decremented.
    #[serde(default, alias = "total_spawned")]
    pub total_spawned: u64,
}

fn default_next_port() -> u16 {
    DEFAULT_BASE_PORT
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

impl Registry {
    /// An empty registry whose port cursor starts at `base_port`.
    pub fn new(base_port: u16) -> Self {
        Self {
            kernels: Vec::new(),
            next_port: base_port,
            total_spawned: 0,
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&KernelRecord> {
        self.kernels.iter().find(|k| k.id == id)
    }

    pub fn find_by_port(&self, port: u16) -> Option<&KernelRecord> {
        self.kernels.iter().find(|k| k.port == port)
    }

    /// Resolve an operator-supplied target.
    ///
    /// All-digit input is tried as a port first; anything that does not
    /// resolve that way is looked up as an id.
    pub fn resolve(&self, target: &str) -> Option<&KernelRecord> {
        let by_port = if !target.is_empty() && target.bytes().all(|b| b.is_ascii_digit()) {
            target.parse::<u16>().ok().and_then(|p| self.find_by_port(p))
        } else {
            None
        };
        by_port.or_else(|| self.find_by_id(target))
    }

    /// `true` when any record currently claims `port`.
    pub fn port_in_use(&self, port: u16) -> bool {
        self.kernels.iter().any(|k| k.port == port)
    }

    /// Append a freshly spawned record and advance the counters.
    pub fn register(&mut self, record: KernelRecord) {
        self.next_port = record.port.saturating_add(1);
        self.total_spawned += 1;
        self.kernels.push(record);
    }

    /// Remove the record with `id`, returning it.
    pub fn remove(&mut self, id: &str) -> Option<KernelRecord> {
        let idx = self.kernels.iter().position(|k| k.id == id)?;
        Some(self.kernels.remove(idx))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpawnRequest
// ─────────────────────────────────────────────────────────────────────────────

/// Workload shape for a spawn or find-or-create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnRequest {
    pub language: String,
    pub config: String,
    #[serde(alias = "memory_limit")]
    pub memory_limit: Option<String>,
    #[serde(alias = "cpu_limit")]
    pub cpu_limit: Option<f64>,
    #[serde(alias = "env_vars")]
    pub env: BTreeMap<String, String>,
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            config: DEFAULT_CONFIG.to_string(),
            memory_limit: None,
            cpu_limit: None,
            env: BTreeMap::new(),
        }
    }
}

impl SpawnRequest {
    pub fn new(language: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            config: config.into(),
            ..Self::default()
        }
    }

    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    pub fn with_cpu_limit(mut self, fraction: f64) -> Self {
        self.cpu_limit = Some(fraction);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// `true` when any resource ceiling was requested.
    pub fn has_limits(&self) -> bool {
        self.memory_limit.is_some() || self.cpu_limit.is_some()
    }
}
