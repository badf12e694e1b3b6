//! [`ApiServer`] – HTTP + WebSocket front end of a [`Supervisor`].
//!
//! Listens on `0.0.0.0:9550` (configurable via [`ApiServer::with_port`])
//! and serves the router from [`create_router`] until shut down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use kfleet_supervisor::Supervisor;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::ApiError;
use crate::router::{AppState, create_router};

/// Default TCP port for the management API.
pub const DEFAULT_PORT: u16 = 9550;

// ─────────────────────────────────────────────────────────────────────────────
// ApiServer
// ─────────────────────────────────────────────────────────────────────────────

/// Serves the management API for one shared [`Supervisor`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use kfleet_api::ApiServer;
/// use kfleet_supervisor::{Supervisor, SupervisorConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let supervisor = Arc::new(Supervisor::new("/tmp/fleet", SupervisorConfig::default()));
///     ApiServer::new(supervisor)
///         .with_port(9550)
///         .run()
///         .await
///         .expect("api server failed");
/// }
/// ```
pub struct ApiServer {
    supervisor: Arc<Supervisor>,
    port: u16,
}

impl ApiServer {
    /// Create a server for `supervisor` on the [`DEFAULT_PORT`].
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind and serve until the process exits.
    ///
    /// # Errors
    ///
    /// [`ApiError::Internal`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), ApiError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Internal(format!("bind error on {addr}: {e}")))?;
        info!(%addr, "management API listening");
        serve(listener, self.supervisor, shutdown).await
    }
}

/// Serve on an already-bound `listener` until `shutdown` resolves, then
/// let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    supervisor: Arc<Supervisor>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let app = create_router(AppState::new(supervisor));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("server error: {e}")))?;
    info!("management API shut down");
    Ok(())
}
