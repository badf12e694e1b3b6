//! `kfleet-api` – management API for the kernel fleet.
//!
//! Boots an axum HTTP + WebSocket server (default port `9550`) in front of
//! one shared [`Supervisor`](kfleet_supervisor::Supervisor):
//!
//! 1. **Routes** JSON requests onto supervisor operations (spawn, list,
//!    stop, find-or-create, metrics, registry dump).  Supervisor errors map
//!    onto HTTP statuses with a `{"error", "message"}` body.
//!
//! 2. **Streams** lifecycle events from the supervisor's
//!    [`FleetBus`](kfleet_supervisor::FleetBus) to every client connected to
//!    `GET /events` over a WebSocket.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kfleet_api::ApiServer;
//! use kfleet_supervisor::{Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let supervisor = Arc::new(Supervisor::new("/tmp/fleet", SupervisorConfig::default()));
//!     ApiServer::new(supervisor).run().await.expect("api server failed");
//! }
//! ```

pub mod error;
mod events;
pub mod router;
pub mod server;
#[cfg(test)]
mod testing;

pub use error::ApiError;
pub use router::{AppState, create_router};
pub use server::{ApiServer, DEFAULT_PORT, serve};
