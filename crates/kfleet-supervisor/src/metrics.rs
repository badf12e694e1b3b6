//! Per-kernel resource sampling and fleet aggregates.
//!
//! [`MetricsCollector`] samples every registered PID with `sysinfo` (two
//! refreshes, one CPU interval apart) and folds the samples into a
//! [`FleetMetrics`] snapshot.  The snapshot serializes to JSON for the API
//! and renders as Prometheus text exposition through
//! [`FleetMetrics::to_prometheus`].
//!
//! | metric | type | labels |
//! |---|---|---|
//! | `kfleet_kernel_memory_bytes` | gauge | `id`, `port`, `language` |
//! | `kfleet_kernel_cpu_percent` | gauge | `id`, `port`, `language` |
//! | `kfleet_kernel_threads` | gauge | `id`, `port`, `language` |
//! | `kfleet_kernel_connections` | gauge | `id`, `port`, `language` |
//! | `kfleet_kernel_uptime_seconds` | gauge | `id`, `port`, `language` |
//! | `kfleet_kernels_registered` | gauge | – |
//! | `kfleet_kernels_running` | gauge | – |
//! | `kfleet_memory_bytes_total` | gauge | – |
//! | `kfleet_cpu_percent_total` | gauge | – |
//! | `kfleet_kernels_spawned_total` | counter | – |

use std::time::Duration;

use chrono::{DateTime, Utc};
use kfleet_types::{KernelRecord, Registry};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntGauge, Opts, TextEncoder};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, trace};

use crate::config::{AlertThresholds, SupervisorConfig};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot types
// ─────────────────────────────────────────────────────────────────────────────

/// One sampled kernel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelMetrics {
    pub id: String,
    pub pid: u32,
    pub port: u16,
    pub language: String,
    pub config: String,
    pub memory_bytes: u64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub threads: u64,
    pub connections: u64,
    pub uptime_seconds: u64,
    pub uptime_hours: f64,
}

/// Fleet-wide totals, averages over sampled kernels, and alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total_memory_mb: f64,
    pub avg_memory_mb: f64,
    pub total_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub alerts: Vec<String>,
}

/// A point-in-time view of the whole fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetMetrics {
    pub timestamp: DateTime<Utc>,
    /// Records in the registry, alive or not.
    pub total_kernels: usize,
    /// Records whose process could be sampled.
    pub running: usize,
    pub total_spawned: u64,
    pub kernels: Vec<KernelMetrics>,
    pub summary: FleetSummary,
}

impl FleetMetrics {
    pub fn from_samples(
        registry: &Registry,
        kernels: Vec<KernelMetrics>,
        thresholds: &AlertThresholds,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            total_kernels: registry.kernels.len(),
            running: kernels.len(),
            total_spawned: registry.total_spawned,
            summary: summarize(&kernels, thresholds),
            kernels,
        }
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.kernels.iter().map(|k| k.memory_bytes).sum()
    }
}

/// Totals, averages and threshold alerts for a set of samples.
pub fn summarize(kernels: &[KernelMetrics], thresholds: &AlertThresholds) -> FleetSummary {
    let total_memory_mb: f64 = kernels.iter().map(|k| k.memory_mb).sum();
    let total_cpu_percent: f64 = kernels.iter().map(|k| k.cpu_percent).sum();
    let (avg_memory_mb, avg_cpu_percent) = if kernels.is_empty() {
        (0.0, 0.0)
    } else {
        let n = kernels.len() as f64;
        (total_memory_mb / n, total_cpu_percent / n)
    };

    let mut alerts = Vec::new();
    for k in kernels {
        if k.memory_mb > thresholds.memory_mb {
            alerts.push(format!("High memory: {} using {:.0}MB", k.id, k.memory_mb));
        }
        if k.cpu_percent > thresholds.cpu_percent {
            alerts.push(format!("High CPU: {} using {:.0}%", k.id, k.cpu_percent));
        }
        if k.uptime_hours > thresholds.uptime_hours {
            alerts.push(format!("Long running: {} up {:.1} hours", k.id, k.uptime_hours));
        }
    }

    FleetSummary {
        total_memory_mb: round2(total_memory_mb),
        avg_memory_mb: round2(avg_memory_mb),
        total_cpu_percent: round2(total_cpu_percent),
        avg_cpu_percent: round2(avg_cpu_percent),
        alerts,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ─────────────────────────────────────────────────────────────────────────────
// Collector
// ─────────────────────────────────────────────────────────────────────────────

/// Samples registered kernels through `sysinfo`.
pub struct MetricsCollector {
    interval: Duration,
    thresholds: AlertThresholds,
}

impl MetricsCollector {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            interval: config.cpu_sample_interval().max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            thresholds: config.alerts.clone(),
        }
    }

    /// Sample every record in `registry`.  PIDs that vanished (or are
    /// zombies) are skipped.
    pub fn collect(&self, registry: &Registry) -> FleetMetrics {
        let pids: Vec<Pid> = registry.kernels.iter().map(|k| Pid::from_u32(k.pid)).collect();
        let mut kernels = Vec::with_capacity(pids.len());

        if !pids.is_empty() {
            let refresh = ProcessRefreshKind::new().with_cpu().with_memory();
            let mut system = System::new();
            // CPU usage is a delta between two refreshes.
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), refresh);
            std::thread::sleep(self.interval);
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&pids), refresh);

            let now = Utc::now();
            for record in &registry.kernels {
                match system.process(Pid::from_u32(record.pid)) {
                    Some(process) if process.status() != ProcessStatus::Zombie => {
                        kernels.push(sample(record, process, now));
                    }
                    _ => trace!(kernel_id = %record.id, pid = record.pid, "kernel not sampled"),
                }
            }
        }

        debug!(registered = registry.kernels.len(), sampled = kernels.len(), "fleet sampled");
        FleetMetrics::from_samples(registry, kernels, &self.thresholds)
    }
}

fn sample(record: &KernelRecord, process: &sysinfo::Process, now: DateTime<Utc>) -> KernelMetrics {
    let memory_bytes = process.memory();
    let now_secs = u64::try_from(now.timestamp()).unwrap_or(0);
    let uptime_seconds = match process.start_time() {
        0 => u64::try_from((now - record.started_at).num_seconds()).unwrap_or(0),
        started => now_secs.saturating_sub(started),
    };
    KernelMetrics {
        id: record.id.clone(),
        pid: record.pid,
        port: record.port,
        language: record.language.clone(),
        config: record.config.clone(),
        memory_bytes,
        memory_mb: round2(memory_bytes as f64 / BYTES_PER_MB),
        cpu_percent: round2(f64::from(process.cpu_usage())),
        // sysinfo lists every thread except the main one.
        threads: process.tasks().map_or(0, |tasks| tasks.len() as u64 + 1),
        connections: socket_count(record.pid),
        uptime_seconds,
        uptime_hours: round2(uptime_seconds as f64 / 3600.0),
    }
}

#[cfg(target_os = "linux")]
fn socket_count(pid: u32) -> u64 {
    let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .filter(|target| target.to_string_lossy().starts_with("socket:"))
        .count() as u64
}

#[cfg(not(target_os = "linux"))]
fn socket_count(_pid: u32) -> u64 {
    0
}

// ─────────────────────────────────────────────────────────────────────────────
// Prometheus exposition
// ─────────────────────────────────────────────────────────────────────────────

const KERNEL_LABELS: &[&str] = &["id", "port", "language"];

impl FleetMetrics {
    /// Render this snapshot in the Prometheus text exposition format.
    ///
    /// A fresh [`prometheus::Registry`] is built per call, so the output
    /// describes exactly this snapshot.  Per-kernel families are omitted
    /// when nothing was sampled.
    pub fn to_prometheus(&self) -> Result<String, prometheus::Error> {
        let registry = prometheus::Registry::new();

        let kernel_gauge = |name: &str,
                            help: &str,
                            value: fn(&KernelMetrics) -> f64|
         -> prometheus::Result<()> {
            let family = GaugeVec::new(Opts::new(name, help), KERNEL_LABELS)?;
            for k in &self.kernels {
                let port = k.port.to_string();
                family
                    .with_label_values(&[k.id.as_str(), port.as_str(), k.language.as_str()])
                    .set(value(k));
            }
            registry.register(Box::new(family))
        };
        kernel_gauge("kfleet_kernel_memory_bytes", "Resident memory of the kernel process.", |k| {
            k.memory_bytes as f64
        })?;
        kernel_gauge("kfleet_kernel_cpu_percent", "CPU usage of the kernel process.", |k| {
            k.cpu_percent
        })?;
        kernel_gauge("kfleet_kernel_threads", "Threads in the kernel process.", |k| {
            k.threads as f64
        })?;
        kernel_gauge(
            "kfleet_kernel_connections",
            "Open sockets held by the kernel process.",
            |k| k.connections as f64,
        )?;
        kernel_gauge(
            "kfleet_kernel_uptime_seconds",
            "Seconds since the kernel process started.",
            |k| k.uptime_seconds as f64,
        )?;

        let registered = IntGauge::new("kfleet_kernels_registered", "Kernels in the registry.")?;
        registered.set(saturating_i64(self.total_kernels as u64));
        registry.register(Box::new(registered))?;

        let running = IntGauge::new("kfleet_kernels_running", "Kernels whose process was sampled.")?;
        running.set(saturating_i64(self.running as u64));
        registry.register(Box::new(running))?;

        let memory = IntGauge::new(
            "kfleet_memory_bytes_total",
            "Resident memory across sampled kernels.",
        )?;
        memory.set(saturating_i64(self.total_memory_bytes()));
        registry.register(Box::new(memory))?;

        let cpu = Gauge::new("kfleet_cpu_percent_total", "CPU usage across sampled kernels.")?;
        cpu.set(self.summary.total_cpu_percent);
        registry.register(Box::new(cpu))?;

        let spawned = IntCounter::new("kfleet_kernels_spawned_total", "Kernels ever registered.")?;
        spawned.inc_by(self.total_spawned);
        registry.register(Box::new(spawned))?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use kfleet_types::KernelStatus;

    use super::*;

    fn kernel(id: &str, memory_mb: f64, cpu: f64, uptime_hours: f64) -> KernelMetrics {
        KernelMetrics {
            id: id.into(),
            pid: 1,
            port: 9555,
            language: "lua".into(),
            config: "default".into(),
            memory_bytes: (memory_mb * BYTES_PER_MB) as u64,
            memory_mb,
            cpu_percent: cpu,
            threads: 4,
            connections: 1,
            uptime_seconds: (uptime_hours * 3600.0) as u64,
            uptime_hours,
        }
    }

    fn record(id: &str, pid: u32) -> KernelRecord {
        KernelRecord {
            id: id.into(),
            pid,
            port: 9555,
            language: "lua".into(),
            config: "default".into(),
            connection_descriptor: PathBuf::from("c.json"),
            log_path: PathBuf::from("k.log"),
            started_at: Utc::now(),
            status: KernelStatus::Running,
            memory_limit: None,
            cpu_limit: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn summary_totals_and_averages() {
        let summary = summarize(
            &[kernel("a", 100.0, 10.0, 1.0), kernel("b", 300.0, 30.0, 2.0)],
            &AlertThresholds::default(),
        );
        assert_eq!(summary.total_memory_mb, 400.0);
        assert_eq!(summary.avg_memory_mb, 200.0);
        assert_eq!(summary.total_cpu_percent, 40.0);
        assert_eq!(summary.avg_cpu_percent, 20.0);
        assert!(summary.alerts.is_empty());
    }

    #[test]
    fn empty_fleet_has_zero_averages() {
        let summary = summarize(&[], &AlertThresholds::default());
        assert_eq!(summary, FleetSummary::default());
    }

    #[test]
    fn thresholds_raise_alerts() {
        let summary = summarize(
            &[kernel("kernel-hot", 1500.0, 95.0, 30.0)],
            &AlertThresholds::default(),
        );
        assert_eq!(summary.alerts.len(), 3);
        assert!(summary.alerts[0].starts_with("High memory: kernel-hot"));
        assert!(summary.alerts[1].starts_with("High CPU: kernel-hot"));
        assert!(summary.alerts[2].starts_with("Long running: kernel-hot"));
    }

    #[test]
    fn exposition_has_help_type_and_escaped_labels() {
        let mut registry = Registry::default();
        registry.total_spawned = 7;
        let mut k = kernel("kernel-a", 1.0, 2.5, 0.0);
        k.language = "lu\"a\\\n".into();
        let metrics = FleetMetrics::from_samples(&registry, vec![k], &AlertThresholds::default());
        let text = metrics.to_prometheus().unwrap();

        assert!(text.contains("# HELP kfleet_kernel_memory_bytes "));
        assert!(text.contains("# TYPE kfleet_kernel_memory_bytes gauge"));
        assert!(text.contains("# TYPE kfleet_kernels_spawned_total counter"));
        assert!(text.contains("kfleet_kernels_spawned_total 7"));
        assert!(text.contains("kfleet_kernels_running 1"));
        assert!(text.contains("kfleet_memory_bytes_total 1048576"));

        let cpu_line = text
            .lines()
            .find(|line| line.starts_with("kfleet_kernel_cpu_percent{"))
            .unwrap();
        assert!(cpu_line.contains(r#"id="kernel-a""#), "{cpu_line}");
        assert!(cpu_line.contains(r#"port="9555""#), "{cpu_line}");
        assert!(cpu_line.contains(r#"language="lu\"a\\\n""#), "{cpu_line}");
        assert!(cpu_line.ends_with(" 2.5"), "{cpu_line}");
    }

    #[test]
    fn empty_fleet_exposes_only_fleet_aggregates() {
        let metrics =
            FleetMetrics::from_samples(&Registry::default(), vec![], &AlertThresholds::default());
        let text = metrics.to_prometheus().unwrap();
        assert!(text.contains("kfleet_kernels_registered 0"));
        assert!(!text.contains("kfleet_kernel_memory_bytes"));
    }

    #[test]
    fn collector_samples_live_pids_and_skips_vanished() {
        let mut registry = Registry::default();
        registry.kernels.push(record("kernel-self", std::process::id()));
        registry.kernels.push(record("kernel-gone", u32::MAX - 1));

        let metrics = MetricsCollector::new(&SupervisorConfig::default()).collect(&registry);
        assert_eq!(metrics.total_kernels, 2);
        assert_eq!(metrics.running, 1);
        let own = &metrics.kernels[0];
        assert_eq!(own.id, "kernel-self");
        assert!(own.memory_bytes > 0);
        #[cfg(target_os = "linux")]
        assert!(own.threads >= 1);
    }

    #[test]
    fn metrics_json_is_camel_case() {
        let metrics = FleetMetrics::from_samples(
            &Registry::default(),
            vec![kernel("a", 1.0, 1.0, 0.0)],
            &AlertThresholds::default(),
        );
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["totalKernels"].is_number());
        assert!(json["summary"]["avgMemoryMb"].is_number());
        assert!(json["kernels"][0]["cpuPercent"].is_number());
    }
}
