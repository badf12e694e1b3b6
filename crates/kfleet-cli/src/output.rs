//! Human-readable rendering of supervisor results.
//!
//! Renderers return `String`s so they can be tested without a terminal;
//! `colored` drops its escape codes automatically when stdout is not a TTY.
//! Cells are padded before they are coloured so columns stay aligned.

use chrono::{DateTime, Utc};
use colored::Colorize;
use kfleet_supervisor::{FleetMetrics, StopOutcome};
use kfleet_types::{KernelRecord, KernelStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Kernels
// ─────────────────────────────────────────────────────────────────────────────

/// One row per kernel; `verbose` adds limits, paths and environment.
pub fn kernel_table(kernels: &[KernelRecord], verbose: bool) -> String {
    if kernels.is_empty() {
        return format!("{}", "No kernels running".dimmed());
    }

    let now = Utc::now();
    let mut out = format!(
        "{}\n",
        format!(
            "{:<17} {:>7} {:>6}  {:<10} {:<14} {:<8} {}",
            "ID", "PID", "PORT", "LANGUAGE", "CONFIG", "STATUS", "UPTIME"
        )
        .bold()
    );
    for k in kernels {
        out.push_str(&format!(
            "{} {:>7} {:>6}  {:<10} {:<14} {} {}\n",
            format!("{:<17}", k.id).cyan(),
            k.pid,
            k.port,
            k.language,
            k.config,
            status_cell(k.status),
            format_uptime(uptime_secs(k.started_at, now)),
        ));
        if verbose {
            out.push_str(&verbose_lines(k));
        }
    }
    out.push_str(&format!("{}", format!("{} kernel(s)", kernels.len()).dimmed()));
    out
}

fn status_cell(status: KernelStatus) -> String {
    let cell = format!("{:<8}", status.to_string());
    match status {
        KernelStatus::Running => cell.green().to_string(),
        KernelStatus::Unknown => cell.yellow().to_string(),
    }
}

fn verbose_lines(k: &KernelRecord) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: String| {
        out.push_str(&format!("    {:<12} {}\n", label.dimmed(), value));
    };
    line("started", k.started_at.to_rfc3339());
    line("log", k.log_path.display().to_string());
    line("connection", k.connection_descriptor.display().to_string());
    if let Some(memory) = &k.memory_limit {
        line("memory", memory.clone());
    }
    if let Some(cpu) = k.cpu_limit {
        line("cpu", format!("{:.0}% of one core", cpu * 100.0));
    }
    for (key, value) in &k.env {
        line("env", format!("{key}={value}"));
    }
    out
}

/// Multi-line description of one kernel, used after spawn and find.
pub fn kernel_details(k: &KernelRecord) -> String {
    let mut out = format!("  {:<12} {}\n", "id", k.id.bold().cyan());
    out.push_str(&format!("  {:<12} {}\n", "pid", k.pid));
    out.push_str(&format!("  {:<12} {}\n", "port", k.port));
    out.push_str(&format!("  {:<12} {}\n", "language", k.language));
    out.push_str(&format!("  {:<12} {}\n", "config", k.config));
    out.push_str(&format!("  {:<12} {}\n", "connection", k.connection_descriptor.display()));
    out.push_str(&format!("  {:<12} {}", "log", k.log_path.display()));
    out
}

pub fn stop_summary(outcome: &StopOutcome) -> String {
    let k = &outcome.record;
    let how = if outcome.already_dead {
        "was already gone".dimmed().to_string()
    } else if outcome.forced {
        "killed".yellow().to_string()
    } else {
        "stopped".green().to_string()
    };
    format!("{} (pid {}, port {}) {}", k.id.bold(), k.pid, k.port, how)
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

pub fn metrics_text(metrics: &FleetMetrics) -> String {
    let mut out = format!(
        "{}  {} registered, {} running, {} spawned total\n",
        "Fleet".bold(),
        metrics.total_kernels,
        metrics.running.to_string().green(),
        metrics.total_spawned,
    );

    if !metrics.kernels.is_empty() {
        out.push_str(&format!(
            "\n{}\n",
            format!(
                "{:<17} {:>6} {:>10} {:>7} {:>7} {:>7}  {}",
                "ID", "PORT", "MEMORY", "CPU", "THREADS", "SOCKETS", "UPTIME"
            )
            .bold()
        ));
        for k in &metrics.kernels {
            out.push_str(&format!(
                "{} {:>6} {:>8.1}MB {:>6.1}% {:>7} {:>7}  {}\n",
                format!("{:<17}", k.id).cyan(),
                k.port,
                k.memory_mb,
                k.cpu_percent,
                k.threads,
                k.connections,
                format_uptime(k.uptime_seconds),
            ));
        }
    }

    let s = &metrics.summary;
    out.push_str(&format!(
        "\n  memory  {:.1}MB total, {:.1}MB avg\n  cpu     {:.1}% total, {:.1}% avg",
        s.total_memory_mb, s.avg_memory_mb, s.total_cpu_percent, s.avg_cpu_percent
    ));
    for alert in &s.alerts {
        out.push_str(&format!("\n{} {}", "⚠".yellow(), alert.yellow()));
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn uptime_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - started_at).num_seconds()).unwrap_or(0)
}

/// `42s`, `7m 05s`, `3h 12m`, `2d 04h`.
pub fn format_uptime(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m {:02}s", secs / 60, secs % 60),
        3_600..86_400 => format!("{}h {:02}m", secs / 3_600, secs % 3_600 / 60),
        _ => format!("{}d {:02}h", secs / 86_400, secs % 86_400 / 3_600),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message);
}

/// Red diagnostic on stderr.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗ error:".red().bold(), message.red());
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use kfleet_supervisor::{AlertThresholds, KernelMetrics};
    use kfleet_types::Registry;

    use super::*;

    fn record(id: &str, port: u16) -> KernelRecord {
        KernelRecord {
            id: id.into(),
            pid: 4242,
            port,
            language: "lua".into(),
            config: "default".into(),
            connection_descriptor: PathBuf::from("/tmp/fleet/kernel.json"),
            log_path: PathBuf::from("/tmp/fleet/logs/kernel.log"),
            started_at: Utc::now(),
            status: KernelStatus::Running,
            memory_limit: Some("512M".into()),
            cpu_limit: Some(0.5),
            env: BTreeMap::from([("RUST_LOG".to_string(), "debug".to_string())]),
        }
    }

    #[test]
    fn uptime_buckets() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(59), "59s");
        assert_eq!(format_uptime(65), "1m 05s");
        assert_eq!(format_uptime(3_600 * 3 + 60 * 12), "3h 12m");
        assert_eq!(format_uptime(86_400 * 2 + 3_600 * 4), "2d 04h");
    }

    #[test]
    fn uptime_of_future_start_is_zero() {
        let now = Utc::now();
        assert_eq!(uptime_secs(now + chrono::Duration::seconds(5), now), 0);
    }

    #[test]
    fn empty_table_says_so() {
        assert!(kernel_table(&[], false).contains("No kernels running"));
    }

    #[test]
    fn table_lists_every_kernel() {
        let table = kernel_table(&[record("kernel-aaaa0001", 9555), record("kernel-bbbb0002", 9556)], false);
        assert!(table.contains("kernel-aaaa0001"));
        assert!(table.contains("9556"));
        assert!(table.contains("2 kernel(s)"));
        assert!(!table.contains("RUST_LOG"));
    }

    #[test]
    fn verbose_table_shows_limits_and_env() {
        let table = kernel_table(&[record("kernel-aaaa0001", 9555)], true);
        assert!(table.contains("512M"));
        assert!(table.contains("50% of one core"));
        assert!(table.contains("RUST_LOG=debug"));
        assert!(table.contains("/tmp/fleet/logs/kernel.log"));
    }

    #[test]
    fn stop_summary_reflects_outcome() {
        let outcome = StopOutcome {
            record: record("kernel-aaaa0001", 9555),
            forced: false,
            already_dead: true,
        };
        assert!(stop_summary(&outcome).contains("already gone"));
    }

    #[test]
    fn metrics_text_includes_alerts() {
        let sample = KernelMetrics {
            id: "kernel-aaaa0001".into(),
            pid: 4242,
            port: 9555,
            language: "lua".into(),
            config: "default".into(),
            memory_bytes: 2_000 * 1024 * 1024,
            memory_mb: 2_000.0,
            cpu_percent: 5.0,
            threads: 4,
            connections: 2,
            uptime_seconds: 30,
            uptime_hours: 0.01,
        };
        let mut registry = Registry::default();
        registry.kernels.push(record("kernel-aaaa0001", 9555));
        registry.total_spawned = 3;
        let metrics = FleetMetrics::from_samples(&registry, vec![sample], &AlertThresholds::default());

        let text = metrics_text(&metrics);
        assert!(text.contains("1 registered"));
        assert!(text.contains("3 spawned total"));
        assert!(text.contains("kernel-aaaa0001"));
        assert!(text.contains("High memory: kernel-aaaa0001 using 2000MB"));
    }
}
