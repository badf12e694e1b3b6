//! Subcommand dispatch onto the shared [`Supervisor`].

use std::sync::Arc;

use kfleet_api::{ApiError, ApiServer};
use kfleet_supervisor::Supervisor;
use kfleet_types::FleetError;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::info;

use crate::cli::{Command, MetricsFormat};
use crate::output;

/// Exit status used when the operator interrupts a command.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{failed} of {total} kernel(s) could not be stopped")]
    PartialStop { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics encoding failed: {0}")]
    Exposition(String),
}

impl CliError {
    /// Process exit status for this failure.
    pub fn exit_status(&self) -> u8 {
        match self {
            CliError::Fleet(FleetError::Cancelled) => EXIT_INTERRUPTED,
            _ => 1,
        }
    }
}

/// Everything a subcommand needs besides its own arguments.
pub struct Context {
    pub supervisor: Arc<Supervisor>,
    pub api_port: u16,
    /// Notified once on Ctrl-C; stops `serve`.
    pub shutdown: Arc<Notify>,
}

pub fn run(command: Command, ctx: &Context) -> Result<(), CliError> {
    let sup = &ctx.supervisor;
    match command {
        Command::Spawn(args) => {
            let record = sup.spawn(&args.to_request())?;
            output::print_success(&format!("Spawned kernel on port {}", record.port));
            println!("{}", output::kernel_details(&record));
        }
        Command::List { verbose } => {
            println!("{}", output::kernel_table(&sup.list()?, verbose));
        }
        Command::Stop { target, force } => {
            let outcome = sup.stop(&target, force)?;
            output::print_success(&output::stop_summary(&outcome));
        }
        Command::StopAll { force } => {
            let report = sup.stop_all(force)?;
            for outcome in &report.stopped {
                output::print_success(&output::stop_summary(outcome));
            }
            for (id, err) in &report.failed {
                output::print_error(&format!("{id}: {err}"));
            }
            if !report.is_clean() {
                return Err(CliError::PartialStop {
                    failed: report.failed.len(),
                    total: report.failed.len() + report.stopped.len(),
                });
            }
            if report.stopped.is_empty() {
                println!("No kernels to stop");
            }
        }
        Command::Cleanup => {
            let removed = sup.reap()?;
            for k in &removed {
                output::print_warning(&format!(
                    "Removed dead kernel {} (pid {}, port {})",
                    k.id, k.pid, k.port
                ));
            }
            output::print_success(&format!("Cleaned up {} dead kernel(s)", removed.len()));
        }
        Command::Find(args) => {
            let outcome = sup.find_or_create(&args.to_request())?;
            let verb = if outcome.reused { "Reusing" } else { "Spawned" };
            output::print_success(&format!("{verb} kernel on port {}", outcome.record.port));
            println!("{}", output::kernel_details(&outcome.record));
        }
        Command::Metrics { format } => {
            let metrics = sup.metrics()?;
            match format {
                MetricsFormat::Text => println!("{}", output::metrics_text(&metrics)),
                MetricsFormat::Json => println!("{}", serde_json::to_string_pretty(&metrics)?),
                MetricsFormat::Prometheus => print!(
                    "{}",
                    metrics
                        .to_prometheus()
                        .map_err(|e| CliError::Exposition(e.to_string()))?
                ),
            }
        }
        Command::Registry => {
            println!("{}", serde_json::to_string_pretty(&sup.registry()?)?);
        }
        Command::Serve { port } => serve(ctx, port.unwrap_or(ctx.api_port))?,
    }
    Ok(())
}

fn serve(ctx: &Context, port: u16) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let shutdown = Arc::clone(&ctx.shutdown);
    let server = ApiServer::new(Arc::clone(&ctx.supervisor)).with_port(port);
    runtime.block_on(server.run_until(async move { shutdown.notified().await }))?;
    info!("management API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use kfleet_supervisor::SupervisorConfig;
    use kfleet_supervisor::limits::NoopLimiter;

    use super::*;

    fn context(dir: &std::path::Path) -> Context {
        let config = SupervisorConfig {
            kernel_binary: "kfleet-no-such-kernel".into(),
            binary_search_paths: vec![],
            ..SupervisorConfig::default()
        };
        Context {
            supervisor: Arc::new(Supervisor::new(dir, config).with_limiter(NoopLimiter)),
            api_port: 0,
            shutdown: Arc::new(Notify::new()),
        }
    }

    #[test]
    fn read_only_commands_succeed_on_empty_fleet() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        for command in [
            Command::List { verbose: true },
            Command::Cleanup,
            Command::Registry,
            Command::StopAll { force: false },
            Command::Metrics { format: MetricsFormat::Json },
            Command::Metrics { format: MetricsFormat::Prometheus },
        ] {
            run(command, &ctx).unwrap();
        }
    }

    #[test]
    fn stopping_unknown_kernel_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            Command::Stop { target: "kernel-missing".into(), force: false },
            &context(dir.path()),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::Fleet(FleetError::KernelNotFound(_))));
        assert_eq!(err.exit_status(), 1);
    }

    #[test]
    fn cancelled_maps_to_interrupted_exit() {
        let err = CliError::Fleet(FleetError::Cancelled);
        assert_eq!(err.exit_status(), EXIT_INTERRUPTED);
    }

    #[test]
    fn serve_returns_after_shutdown_notification() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.shutdown.notify_one();
        run(Command::Serve { port: None }, &ctx).unwrap();
    }
}
