//! Lifecycle events broadcast by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::KernelRecord;

/// A timestamped fleet lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: FleetEventKind,
}

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEventKind {
    /// A kernel passed readiness and was registered.
    Spawned { record: KernelRecord },
    /// A kernel was stopped on request.
    Stopped {
        id: String,
        pid: u32,
        port: u16,
        /// SIGKILL was used, either on request or after the graceful timeout.
        forced: bool,
        already_dead: bool,
    },
    /// A dead kernel was pruned by the reaper.
    Reaped { id: String, pid: u32, port: u16 },
}

impl FleetEvent {
    pub fn now(kind: FleetEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Id of the kernel this event concerns.
    pub fn kernel_id(&self) -> &str {
        match &self.kind {
            FleetEventKind::Spawned { record } => &record.id,
            FleetEventKind::Stopped { id, .. } | FleetEventKind::Reaped { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_flat_and_tagged() {
        let ev = FleetEvent::now(FleetEventKind::Reaped {
            id: "kernel-a".into(),
            pid: 12,
            port: 9555,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "reaped");
        assert_eq!(json["id"], "kernel-a");
        assert!(json.get("timestamp").is_some());

        let back: FleetEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.kernel_id(), "kernel-a");
    }
}
