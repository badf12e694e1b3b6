//! `GET /events` – one JSON text frame per
//! [`FleetEvent`](kfleet_types::FleetEvent) published on the supervisor's
//! bus.  The stream is one-way; client frames other than close are ignored.

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use kfleet_types::FleetEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::router::AppState;

pub(crate) async fn subscribe(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let upgrade = upgrade.map_err(|e| {
        ApiError::BadRequest(format!("/events requires a WebSocket upgrade: {}", e.body_text()))
    })?;
    // Subscribe before answering 101 so nothing published after the client
    // sees the handshake is missed.
    let events = state.supervisor.bus().subscribe();
    Ok(upgrade.on_upgrade(move |socket| forward(socket, events)))
}

async fn forward(socket: WebSocket, mut events: broadcast::Receiver<FleetEvent>) {
    info!("event stream subscriber connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            result = events.recv() => {
                match result {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "event serialization failed"),
                    },
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event stream subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!("event stream subscriber disconnected");
}
