//! Spawn state machine.
//!
//! ```text
//! Requested → BinaryResolved → Launched → PidConfirmed → PortReady
//!           → [LimitsApplied] → Registered
//! ```
//!
//! Runs entirely under the caller's registry guard, so the port chosen in
//! step one cannot be handed to a concurrent spawn before this one is
//! registered.  A kernel that fails after launch is killed, and its PID and
//! connection files removed, before the error is returned.

use std::fs;
use std::path::{Path, PathBuf};

use kfleet_registry::RegistryGuard;
use kfleet_types::{FleetError, FleetEventKind, KernelRecord, KernelStatus, SpawnRequest};
use tracing::{debug, info, warn};

use crate::launcher::{ArtifactPaths, LaunchPlan};
use crate::limits::ResourceLimits;
use crate::port;
use crate::process::ProcessSignal;
use crate::supervisor::Supervisor;
use crate::wait::{WaitOutcome, wait_for};

impl Supervisor {
    pub(crate) fn spawn_locked(
        &self,
        guard: &mut RegistryGuard<'_>,
        request: &SpawnRequest,
    ) -> Result<KernelRecord, FleetError> {
        if self.cancel.is_cancelled() {
            return Err(FleetError::Cancelled);
        }
        let kernel_id = KernelRecord::generate_id();
        debug!(
            kernel_id = %kernel_id,
            language = %request.language,
            config = %request.config,
            state = "requested",
            "spawn"
        );

        let binary = self.launcher.resolve()?;
        debug!(kernel_id = %kernel_id, binary = %binary.display(), state = "binary_resolved", "spawn");

        let port = port::find_free_port(&**guard, None, self.config.port_upper_bound)?;
        let plan = LaunchPlan {
            paths: ArtifactPaths::for_kernel(&self.fleet_dir, &kernel_id),
            config_file: self.resolve_config_file(&request.config),
            env: request.env.clone(),
            kernel_id,
            port,
        };
        let launched = self.launcher.launch(&binary, &plan)?;
        debug!(kernel_id = %plan.kernel_id, port, launched_pid = ?launched, state = "launched", "spawn");

        let pid = match self.await_pid(&plan.paths.pid_file) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(kernel_id = %plan.kernel_id, port, error = %e, "kernel never confirmed its PID");
                self.abandon_unconfirmed(launched, &plan.paths);
                return Err(e);
            }
        };
        debug!(kernel_id = %plan.kernel_id, pid, state = "pid_confirmed", "spawn");

        self.await_ready(pid, &plan)?;
        debug!(kernel_id = %plan.kernel_id, pid, port, state = "port_ready", "spawn");

        let limits =
            ResourceLimits::from_request(request.memory_limit.as_deref(), request.cpu_limit);
        if !limits.is_empty() {
            match self.limiter.apply(pid, &limits) {
                Ok(()) => {
                    debug!(kernel_id = %plan.kernel_id, pid, state = "limits_applied", "spawn")
                }
                Err(e) if self.config.strict_limits => {
                    self.abandon(pid, &plan.paths);
                    return Err(e);
                }
                Err(e) => warn!(
                    kernel_id = %plan.kernel_id,
                    limiter = self.limiter.name(),
                    error = %e,
                    "resource limits not applied"
                ),
            }
        }

        let record = KernelRecord {
            id: plan.kernel_id.clone(),
            pid,
            port,
            language: request.language.clone(),
            config: request.config.clone(),
            connection_descriptor: plan.paths.connection_descriptor.clone(),
            log_path: plan.paths.log_file.clone(),
            started_at: chrono::Utc::now(),
            status: KernelStatus::Running,
            memory_limit: request.memory_limit.clone(),
            cpu_limit: request.cpu_limit,
            env: request.env.clone(),
        };

        let before = guard.snapshot();
        guard.register(record.clone());
        if let Err(e) = guard.commit() {
            **guard = before;
            self.abandon(pid, &plan.paths);
            return Err(e);
        }

        info!(
            kernel_id = %record.id,
            pid,
            port,
            language = %record.language,
            config = %record.config,
            "kernel registered"
        );
        self.bus.publish(FleetEventKind::Spawned {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Poll for the PID file the daemon writes once it has forked.
    fn await_pid(&self, pid_file: &Path) -> Result<u32, FleetError> {
        let outcome = wait_for(self.config.pid_file_budget(), &self.cancel, || {
            read_pid_file(pid_file)
        });
        match outcome {
            WaitOutcome::Ready(pid) => Ok(pid),
            WaitOutcome::TimedOut => Err(FleetError::PidFileTimeout {
                path: pid_file.to_path_buf(),
                attempts: self.config.pid_file_attempts,
            }),
            WaitOutcome::Cancelled => Err(FleetError::Cancelled),
        }
    }

    /// Wait until the kernel accepts TCP connections, failing early if the
    /// process dies first.
    fn await_ready(&self, pid: u32, plan: &LaunchPlan) -> Result<(), FleetError> {
        let budget = self.config.ready_budget();
        let outcome = wait_for(budget, &self.cancel, || {
            if !self.processes.is_alive(pid) {
                Some(false)
            } else if port::port_accepts(plan.port) {
                Some(true)
            } else {
                None
            }
        });
        let err = match outcome {
            WaitOutcome::Ready(true) => return Ok(()),
            WaitOutcome::Ready(false) => FleetError::KernelExited { pid },
            WaitOutcome::TimedOut => FleetError::PortReadyTimeout {
                port: plan.port,
                timeout: budget.timeout,
            },
            WaitOutcome::Cancelled => FleetError::Cancelled,
        };
        warn!(kernel_id = %plan.kernel_id, pid, port = plan.port, error = %err, "kernel never became ready");
        self.abandon(pid, &plan.paths);
        Err(err)
    }

    /// Best-effort teardown of a kernel that will not be registered.
    fn abandon(&self, pid: u32, paths: &ArtifactPaths) {
        self.kill_abandoned(pid);
        remove_artifacts(paths);
    }

    /// Teardown when no PID was confirmed: kill whatever the launcher
    /// reported, plus a PID file that landed after the last poll.
    fn abandon_unconfirmed(&self, launched: Option<u32>, paths: &ArtifactPaths) {
        let late = read_pid_file(&paths.pid_file).filter(|&pid| Some(pid) != launched);
        for pid in launched.into_iter().chain(late) {
            self.kill_abandoned(pid);
        }
        remove_artifacts(paths);
    }

    fn kill_abandoned(&self, pid: u32) {
        match self.processes.send_signal(pid, ProcessSignal::Kill) {
            Ok(()) => debug!(pid, "killed abandoned kernel"),
            Err(FleetError::ProcessAlreadyDead(_)) => {}
            Err(e) => warn!(pid, error = %e, "could not kill abandoned kernel"),
        }
    }

    /// The config file to forward for `config`, if any.
    ///
    /// The default name (with or without `.toml`) is never forwarded.  Other
    /// names are looked up under the configs directory, bare and with a
    /// `.toml` suffix, then as a path in their own right.
    pub(crate) fn resolve_config_file(&self, config: &str) -> Option<PathBuf> {
        let default = &self.config.default_config;
        if config.is_empty()
            || config == default
            || config.strip_suffix(".toml") == Some(default.as_str())
        {
            return None;
        }
        let dir = &self.config.configs_dir;
        let found = [
            dir.join(config),
            dir.join(format!("{config}.toml")),
            PathBuf::from(config),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file());
        if found.is_none() {
            warn!(config, configs_dir = %dir.display(), "config not found; kernel will use its defaults");
        }
        found
    }
}

/// A positive PID parsed from `pid_file`, if it exists yet.
fn read_pid_file(pid_file: &Path) -> Option<u32> {
    fs::read_to_string(pid_file)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|&pid| pid > 0)
}

fn remove_artifacts(paths: &ArtifactPaths) {
    for path in [&paths.pid_file, &paths.connection_descriptor] {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;

    fn supervisor_with_configs(configs: &Path) -> Supervisor {
        let config = SupervisorConfig {
            configs_dir: configs.to_path_buf(),
            ..SupervisorConfig::default()
        };
        Supervisor::new(configs.join("fleet"), config)
    }

    #[test]
    fn default_config_is_never_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "").unwrap();
        let sup = supervisor_with_configs(dir.path());
        assert_eq!(sup.resolve_config_file("default"), None);
        assert_eq!(sup.resolve_config_file("default.toml"), None);
        assert_eq!(sup.resolve_config_file(""), None);
    }

    #[test]
    fn named_config_resolves_under_configs_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gpu.toml"), "").unwrap();
        let sup = supervisor_with_configs(dir.path());
        assert_eq!(sup.resolve_config_file("gpu.toml"), Some(dir.path().join("gpu.toml")));
        assert_eq!(sup.resolve_config_file("gpu"), Some(dir.path().join("gpu.toml")));
    }

    #[test]
    fn missing_config_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with_configs(dir.path());
        assert_eq!(sup.resolve_config_file("nope"), None);
    }

    #[test]
    fn pid_file_must_hold_a_positive_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("kernel.pid");
        assert_eq!(read_pid_file(&pid_file), None);
        for (raw, expected) in [("4242\n", Some(4242)), ("0", None), ("", None), ("pid", None)] {
            fs::write(&pid_file, raw).unwrap();
            assert_eq!(read_pid_file(&pid_file), expected, "{raw:?}");
        }
    }

    #[test]
    fn cancelled_supervisor_refuses_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_with_configs(dir.path());
        sup.cancel_token().cancel();
        assert!(matches!(
            sup.spawn(&SpawnRequest::default()),
            Err(FleetError::Cancelled)
        ));
        assert_eq!(sup.registry().unwrap().total_spawned, 0);
    }
}
