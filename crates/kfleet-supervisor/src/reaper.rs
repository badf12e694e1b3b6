//! Liveness reaper: prunes records whose process is gone.
//!
//! Pull-based.  It runs before listing and matching, and on demand from
//! `kfleet cleanup`; nothing polls in the background.

use kfleet_registry::RegistryGuard;
use kfleet_types::{FleetError, FleetEventKind, KernelRecord};
use tracing::info;

use crate::supervisor::Supervisor;

impl Supervisor {
    pub(crate) fn reap_locked(
        &self,
        guard: &mut RegistryGuard<'_>,
    ) -> Result<Vec<KernelRecord>, FleetError> {
        let (alive, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut guard.kernels)
            .into_iter()
            .partition(|record| self.processes.is_alive(record.pid));
        guard.kernels = alive;
        if dead.is_empty() {
            return Ok(dead);
        }

        guard.commit()?;
        for record in &dead {
            info!(kernel_id = %record.id, pid = record.pid, port = record.port, "reaped dead kernel");
            self.bus.publish(FleetEventKind::Reaped {
                id: record.id.clone(),
                pid: record.pid,
                port: record.port,
            });
        }
        Ok(dead)
    }
}
