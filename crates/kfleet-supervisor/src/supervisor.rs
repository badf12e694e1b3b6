//! [`Supervisor`] – the single entry point for fleet operations.
//!
//! One instance is constructed explicitly by the embedding binary and shared
//! (behind an `Arc` in the API server).  All operations are synchronous and
//! block the calling thread for at most their configured budgets.

use std::path::{Path, PathBuf};

use kfleet_registry::RegistryStore;
use kfleet_types::{FleetError, KernelRecord, Registry, SpawnRequest};
use tracing::info;

use crate::bus::FleetBus;
use crate::config::SupervisorConfig;
use crate::launcher::{DaemonLauncher, KernelLauncher};
use crate::limits::{ResourceLimiter, default_limiter};
use crate::matcher::FindOutcome;
use crate::metrics::{FleetMetrics, MetricsCollector};
use crate::port;
use crate::process::{OsProcesses, ProcessControl};
use crate::terminate::{StopAllReport, StopOutcome};
use crate::wait::CancelToken;

/// Owns the registry, the launcher, the limiter, the process seam and the
/// event bus.
pub struct Supervisor {
    pub(crate) fleet_dir: PathBuf,
    pub(crate) config: SupervisorConfig,
    pub(crate) store: RegistryStore,
    pub(crate) launcher: Box<dyn KernelLauncher>,
    pub(crate) limiter: Box<dyn ResourceLimiter>,
    pub(crate) processes: Box<dyn ProcessControl>,
    pub(crate) bus: FleetBus,
    pub(crate) cancel: CancelToken,
}

impl Supervisor {
    /// A supervisor managing the fleet in `fleet_dir`, with the daemon
    /// launcher and this platform's resource limiter.
    pub fn new(fleet_dir: impl AsRef<Path>, config: SupervisorConfig) -> Self {
        let fleet_dir = fleet_dir.as_ref().to_path_buf();
        let limiter = default_limiter(&config);
        info!(
            fleet_dir = %fleet_dir.display(),
            limiter = limiter.name(),
            "supervisor initialised"
        );
        Self {
            store: RegistryStore::new(&fleet_dir, config.base_port),
            launcher: Box::new(DaemonLauncher::from_config(&config)),
            limiter,
            processes: Box::new(OsProcesses),
            bus: FleetBus::default(),
            cancel: CancelToken::new(),
            fleet_dir,
            config,
        }
    }

    pub fn with_launcher(mut self, launcher: impl KernelLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_limiter(mut self, limiter: impl ResourceLimiter + 'static) -> Self {
        self.limiter = Box::new(limiter);
        self
    }

    /// Probe and signal kernels through `processes` instead of the host's
    /// process table.
    pub fn with_process_control(mut self, processes: impl ProcessControl + 'static) -> Self {
        self.processes = Box::new(processes);
        self
    }

    pub fn with_bus(mut self, bus: FleetBus) -> Self {
        self.bus = bus;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn fleet_dir(&self) -> &Path {
        &self.fleet_dir
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn bus(&self) -> &FleetBus {
        &self.bus
    }

    /// Token checked by every wait; trip it to abort in-flight operations.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Launch a new kernel and register it once it accepts connections.
    pub fn spawn(&self, request: &SpawnRequest) -> Result<KernelRecord, FleetError> {
        let mut guard = self.store.lock()?;
        self.spawn_locked(&mut guard, request)
    }

    /// Reap dead kernels, then return the live records.
    pub fn list(&self) -> Result<Vec<KernelRecord>, FleetError> {
        let mut guard = self.store.lock()?;
        self.reap_locked(&mut guard)?;
        Ok(guard.kernels.clone())
    }

    /// Look a kernel up by id, or by port for an all-digit target.
    /// Does not probe liveness.
    pub fn get(&self, target: &str) -> Result<KernelRecord, FleetError> {
        self.store
            .load()?
            .resolve(target)
            .cloned()
            .ok_or_else(|| FleetError::KernelNotFound(target.to_string()))
    }

    /// Stop one kernel by id or port.
    pub fn stop(&self, target: &str, force: bool) -> Result<StopOutcome, FleetError> {
        let mut guard = self.store.lock()?;
        self.stop_locked(&mut guard, target, force)
    }

    /// Stop every registered kernel, continuing past failures.
    pub fn stop_all(&self, force: bool) -> Result<StopAllReport, FleetError> {
        let mut guard = self.store.lock()?;
        self.stop_all_locked(&mut guard, force)
    }

    /// Remove records whose process is gone; returns what was removed.
    pub fn reap(&self) -> Result<Vec<KernelRecord>, FleetError> {
        let mut guard = self.store.lock()?;
        self.reap_locked(&mut guard)
    }

    /// Reuse a live kernel with the same language and config, or spawn one.
    pub fn find_or_create(&self, request: &SpawnRequest) -> Result<FindOutcome, FleetError> {
        let mut guard = self.store.lock()?;
        self.find_or_create_locked(&mut guard, request)
    }

    /// Sample every registered kernel.  Does not reap.
    pub fn metrics(&self) -> Result<FleetMetrics, FleetError> {
        let registry = self.store.load()?;
        Ok(MetricsCollector::new(&self.config).collect(&registry))
    }

    /// Raw registry snapshot.
    pub fn registry(&self) -> Result<Registry, FleetError> {
        self.store.load()
    }

    /// First free port at or above `hint` (or the registry cursor).
    pub fn find_free_port(&self, hint: Option<u16>) -> Result<u16, FleetError> {
        let registry = self.store.load()?;
        port::find_free_port(&registry, hint, self.config.port_upper_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::NoopLimiter;

    fn supervisor(dir: &Path) -> Supervisor {
        Supervisor::new(dir, SupervisorConfig::default()).with_limiter(NoopLimiter)
    }

    #[test]
    fn supervisor_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Supervisor>();
    }

    #[test]
    fn fresh_fleet_has_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let registry = sup.registry().unwrap();
        assert!(registry.kernels.is_empty());
        assert_eq!(registry.next_port, 9555);
        assert!(sup.list().unwrap().is_empty());
    }

    #[test]
    fn get_unknown_kernel_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        assert!(matches!(
            sup.get("kernel-missing"),
            Err(FleetError::KernelNotFound(id)) if id == "kernel-missing"
        ));
    }

    #[test]
    fn cancel_token_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        sup.cancel_token().cancel();
        assert!(sup.cancel.is_cancelled());
    }
}
