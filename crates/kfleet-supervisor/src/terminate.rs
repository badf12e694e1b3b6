//! Graceful-then-forced termination.
//!
//! | mode | sequence |
//! |---|---|
//! | graceful | SIGTERM → wait `stop_timeout` → SIGKILL → wait `kill_timeout` |
//! | forced | SIGKILL → wait `kill_timeout` |
//!
//! A process that is already gone counts as stopped.  A process that
//! survives SIGKILL (or cannot be signalled) keeps its record and yields
//! [`FleetError::StopFailed`].

use std::fs;

use kfleet_registry::RegistryGuard;
use kfleet_types::{FleetError, FleetEventKind, KernelRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::launcher::ArtifactPaths;
use crate::process::ProcessSignal;
use crate::supervisor::Supervisor;
use crate::wait::{WaitBudget, WaitOutcome, wait_for};

/// How a kernel went away.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub record: KernelRecord,
    /// SIGKILL was sent.
    pub forced: bool,
    /// The process was gone before any signal landed.
    pub already_dead: bool,
}

/// Result of [`Supervisor::stop_all`].
#[derive(Debug, Default)]
pub struct StopAllReport {
    pub stopped: Vec<StopOutcome>,
    pub failed: Vec<(String, FleetError)>,
}

impl StopAllReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Exit {
    Exited,
    StillAlive,
    Cancelled,
}

impl Supervisor {
    pub(crate) fn stop_locked(
        &self,
        guard: &mut RegistryGuard<'_>,
        target: &str,
        force: bool,
    ) -> Result<StopOutcome, FleetError> {
        let record = guard
            .resolve(target)
            .cloned()
            .ok_or_else(|| FleetError::KernelNotFound(target.to_string()))?;

        let (forced, already_dead) = self.terminate(&record, force)?;

        guard.remove(&record.id);
        guard.commit()?;

        let paths = ArtifactPaths::for_kernel(&self.fleet_dir, &record.id);
        for path in [&paths.pid_file, &record.connection_descriptor] {
            if let Err(e) = fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "artifact not removed");
            }
        }

        info!(
            kernel_id = %record.id,
            pid = record.pid,
            port = record.port,
            forced,
            already_dead,
            "kernel stopped"
        );
        self.bus.publish(FleetEventKind::Stopped {
            id: record.id.clone(),
            pid: record.pid,
            port: record.port,
            forced,
            already_dead,
        });
        Ok(StopOutcome {
            record,
            forced,
            already_dead,
        })
    }

    pub(crate) fn stop_all_locked(
        &self,
        guard: &mut RegistryGuard<'_>,
        force: bool,
    ) -> Result<StopAllReport, FleetError> {
        let ids: Vec<String> = guard.kernels.iter().map(|k| k.id.clone()).collect();
        let mut report = StopAllReport::default();
        for id in ids {
            match self.stop_locked(guard, &id, force) {
                Ok(outcome) => report.stopped.push(outcome),
                Err(FleetError::Cancelled) => return Err(FleetError::Cancelled),
                Err(e) => {
                    warn!(kernel_id = %id, error = %e, "kernel not stopped");
                    report.failed.push((id, e));
                }
            }
        }
        Ok(report)
    }

    /// Signal `record`'s process until it exits.  Returns `(forced,
    /// already_dead)`.
    fn terminate(&self, record: &KernelRecord, force: bool) -> Result<(bool, bool), FleetError> {
        let pid = record.pid;
        if !self.processes.is_alive(pid) {
            return Ok((false, true));
        }

        if !force {
            if !self.signal(record, ProcessSignal::Terminate)? {
                return Ok((false, true));
            }
            match self.await_exit(pid, self.config.stop_budget()) {
                Exit::Exited => return Ok((false, false)),
                Exit::Cancelled => return Err(FleetError::Cancelled),
                Exit::StillAlive => {
                    warn!(kernel_id = %record.id, pid, "graceful stop timed out; sending SIGKILL")
                }
            }
        }

        if !self.signal(record, ProcessSignal::Kill)? {
            return Ok((false, force));
        }
        match self.await_exit(pid, self.config.kill_budget()) {
            Exit::Exited => Ok((true, false)),
            Exit::Cancelled => Err(FleetError::Cancelled),
            Exit::StillAlive => Err(FleetError::StopFailed {
                id: record.id.clone(),
                pid,
                reason: "process survived SIGKILL".to_string(),
            }),
        }
    }

    /// `Ok(true)` when delivered, `Ok(false)` when the process was already
    /// gone.
    fn signal(&self, record: &KernelRecord, signal: ProcessSignal) -> Result<bool, FleetError> {
        match self.processes.send_signal(record.pid, signal) {
            Ok(()) => Ok(true),
            Err(FleetError::ProcessAlreadyDead(_)) => Ok(false),
            Err(e) => Err(FleetError::StopFailed {
                id: record.id.clone(),
                pid: record.pid,
                reason: e.to_string(),
            }),
        }
    }

    fn await_exit(&self, pid: u32, budget: WaitBudget) -> Exit {
        match wait_for(budget, &self.cancel, || (!self.processes.is_alive(pid)).then_some(())) {
            WaitOutcome::Ready(()) => Exit::Exited,
            WaitOutcome::TimedOut => Exit::StillAlive,
            WaitOutcome::Cancelled => Exit::Cancelled,
        }
    }
}
