//! `kfleet-registry` – durable registry of the kernel fleet.
//!
//! # Modules
//!
//! - [`store`] – [`RegistryStore`][store::RegistryStore]: loads and saves
//!   `registry.json` with atomic replace, and hands out
//!   [`RegistryGuard`][store::RegistryGuard]s that hold an advisory
//!   exclusive lock for a whole read-modify-write sequence.

pub mod store;

pub use store::{REGISTRY_FILE, RegistryGuard, RegistryStore};
