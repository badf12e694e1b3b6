//! `kfleet` – operator CLI for a local kernel fleet.
//!
//! This binary:
//!
//! 1. Initialises tracing (stderr, optional OTLP export).
//! 2. Loads `~/.kfleet/config.toml` (written with defaults on first run),
//!    then applies `KFLEET_*` environment overrides and command-line flags.
//! 3. Builds one [`Supervisor`] over the fleet directory.
//! 4. Intercepts **Ctrl-C**: the first press cancels the in-flight spawn or
//!    stop and shuts `serve` down; a second press exits immediately.
//! 5. Runs the subcommand and maps failures to a red diagnostic and a
//!    non-zero exit status.

mod cli;
mod commands;
mod config;
mod output;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::Colorize;
use kfleet_supervisor::Supervisor;
use tokio::sync::Notify;
use tracing::{debug, warn};

use cli::Cli;
use commands::{CliError, Context, EXIT_INTERRUPTED};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = telemetry::init_tracing("kfleet");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::from(e.exit_status())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    // ── Configuration ─────────────────────────────────────────────────────
    let mut cfg = config::resolve(cli.config_file.as_deref()).map_err(CliError::Config)?;
    if let Some(dir) = cli.fleet_dir {
        cfg.fleet_dir = dir;
    }
    debug!(fleet_dir = %cfg.fleet_dir.display(), "configuration resolved");

    let supervisor = Arc::new(Supervisor::new(&cfg.fleet_dir, cfg.supervisor));
    let shutdown = Arc::new(Notify::new());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let cancel = supervisor.cancel_token();
    let shutdown_for_handler = Arc::clone(&shutdown);
    let interrupted = AtomicBool::new(false);
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!();
            eprintln!("{}", "Interrupted again – exiting now.".red().bold());
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
        eprintln!();
        eprintln!(
            "{}",
            "⚠  Ctrl-C received – cancelling (press again to force) …"
                .yellow()
                .bold()
        );
        cancel.cancel();
        shutdown_for_handler.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; operations cannot be cancelled");
    }

    let ctx = Context {
        supervisor,
        api_port: cfg.api_port,
        shutdown,
    };
    commands::run(cli.command, &ctx)
}
