//! `kfleet-supervisor` – lifecycle engine of the kernel fleet.
//!
//! Spawns kernel daemons on free ports, confirms they are reachable, keeps
//! the registry honest, and stops them again.  It does not speak the kernel
//! protocol; it only manages processes, ports and files.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`]: the explicitly constructed entry point
//!   owning the registry store, launcher, limiter and event bus.
//! - [`spawn`] – the `Requested → … → Registered` state machine behind
//!   [`Supervisor::spawn`].
//! - [`terminate`] – graceful-then-forced stop, single and fleet-wide.
//! - [`reaper`] – prunes records whose process no longer exists.
//! - [`matcher`] – find-or-create by language and config.
//! - [`metrics`] – `sysinfo` sampling, summaries, alerts and Prometheus
//!   exposition.
//! - [`launcher`] – [`KernelLauncher`] seam, daemon command line and binary
//!   discovery.
//! - [`limits`] – [`ResourceLimiter`] capability with cgroup, nice and no-op
//!   implementations.
//! - [`port`] – free-port scan and readiness probe.
//! - [`process`] – liveness probing and signalling by PID.
//! - [`wait`] – deadline-bearing, cancellable polling.
//! - [`bus`] – [`FleetBus`] broadcast of lifecycle events.
//! - [`config`] – [`SupervisorConfig`] budgets and policies.

pub mod bus;
pub mod config;
pub mod launcher;
pub mod limits;
pub mod matcher;
pub mod metrics;
pub mod port;
pub mod process;
pub mod reaper;
pub mod spawn;
pub mod supervisor;
pub mod terminate;
pub mod wait;

pub use bus::FleetBus;
pub use config::{AlertThresholds, SupervisorConfig};
pub use launcher::{ArtifactPaths, DaemonLauncher, KernelLauncher, LaunchPlan};
pub use limits::{ResourceLimiter, ResourceLimits};
pub use matcher::FindOutcome;
pub use metrics::{FleetMetrics, FleetSummary, KernelMetrics};
pub use process::{OsProcesses, ProcessControl, ProcessSignal};
pub use supervisor::Supervisor;
pub use terminate::{StopAllReport, StopOutcome};
pub use wait::{CancelToken, WaitBudget, WaitOutcome};
