//! Reuse-first kernel allocation.

use kfleet_registry::RegistryGuard;
use kfleet_types::{FleetError, KernelRecord, KernelStatus, SpawnRequest};
use serde::Serialize;
use tracing::{debug, info};

use crate::supervisor::Supervisor;

/// A kernel serving the requested workload shape.
#[derive(Debug, Clone, Serialize)]
pub struct FindOutcome {
    #[serde(rename = "kernel")]
    pub record: KernelRecord,
    /// `false` when the kernel was spawned for this call.
    pub reused: bool,
}

impl Supervisor {
    /// Reap, then return the first live record matching `request`'s
    /// language and config, spawning one if none exists.
    pub(crate) fn find_or_create_locked(
        &self,
        guard: &mut RegistryGuard<'_>,
        request: &SpawnRequest,
    ) -> Result<FindOutcome, FleetError> {
        self.reap_locked(guard)?;

        let existing = guard
            .kernels
            .iter()
            .find(|k| {
                k.matches(&request.language, &request.config)
                    && k.status == KernelStatus::Running
                    && self.processes.is_alive(k.pid)
            })
            .cloned();

        if let Some(record) = existing {
            info!(kernel_id = %record.id, port = record.port, "reusing kernel");
            return Ok(FindOutcome {
                record,
                reused: true,
            });
        }

        debug!(language = %request.language, config = %request.config, "no matching kernel; spawning");
        let record = self.spawn_locked(guard, request)?;
        Ok(FindOutcome {
            record,
            reused: false,
        })
    }
}
