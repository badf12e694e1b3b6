//! `kfleet-types` – shared vocabulary of the kernel fleet.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`KernelRecord`] / [`Registry`] – the persisted view of the fleet.
//! - [`SpawnRequest`] – the workload shape a caller asks for.
//! - [`FleetEvent`] – lifecycle notifications published by the supervisor.
//! - [`FleetError`] – the single error taxonomy surfaced to callers.

pub mod error;
pub mod event;
pub mod record;

pub use error::FleetError;
pub use event::{FleetEvent, FleetEventKind};
pub use record::{KernelRecord, KernelStatus, Registry, SpawnRequest};

/// First port handed out on a fresh registry.
pub const DEFAULT_BASE_PORT: u16 = 9555;

/// Language requested when a caller does not name one.
pub const DEFAULT_LANGUAGE: &str = "lua";

/// Config name that means "let the kernel use its built-in defaults".
pub const DEFAULT_CONFIG: &str = "default";
