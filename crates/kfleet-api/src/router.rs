//! Request routing onto [`Supervisor`] operations.
//!
//! Supervisor calls block for up to a whole spawn or stop, so every handler
//! runs its operation on the blocking pool.
//!
//! | method & path | operation | success |
//! |---|---|---|
//! | `GET /health` | liveness of the API itself | 200 |
//! | `GET /kernels` | reap, then list | 200 |
//! | `GET /kernels/:target` | lookup by id or port | 200 |
//! | `POST /kernels` | spawn | 201 |
//! | `DELETE /kernels/:target[?force=true]` | stop by id or port | 200 |
//! | `POST /kernels/find` | find-or-create | 200 |
//! | `GET /metrics[?format=prometheus]` | sampled metrics | 200 |
//! | `GET /registry` | raw registry | 200 |
//! | `GET /events` | WebSocket event stream | 101 |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kfleet_supervisor::{FindOutcome, StopOutcome, Supervisor};
use kfleet_types::{FleetError, KernelRecord, Registry, SpawnRequest};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::events;

/// `Content-Type` of the Prometheus text exposition.
pub const CONTENT_TYPE_PROMETHEUS: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

/// Create the management API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/kernels", get(list_kernels).post(spawn_kernel))
        .route("/kernels/find", post(find_kernel))
        .route("/kernels/:target", get(get_kernel).delete(stop_kernel))
        .route("/metrics", get(metrics))
        .route("/registry", get(registry))
        .route("/events", get(events::subscribe))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run `op` against the supervisor on the blocking pool.
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Supervisor) -> Result<T, FleetError> + Send + 'static,
    T: Send + 'static,
{
    let supervisor = Arc::clone(&state.supervisor);
    tokio::task::spawn_blocking(move || op(&supervisor))
        .await
        .map_err(|e| ApiError::Internal(format!("supervisor task failed: {e}")))?
        .map_err(ApiError::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let kernels = blocking(&state, |sup| sup.registry()).await?.kernels.len();
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "kernels": kernels,
    })))
}

async fn list_kernels(State(state): State<AppState>) -> Result<Json<Vec<KernelRecord>>, ApiError> {
    blocking(&state, |sup| sup.list()).await.map(Json)
}

async fn spawn_kernel(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<KernelRecord>), ApiError> {
    let request = spawn_request(&body)?;
    let record = blocking(&state, move |sup| sup.spawn(&request)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn find_kernel(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<FindOutcome>, ApiError> {
    let request = spawn_request(&body)?;
    blocking(&state, move |sup| sup.find_or_create(&request))
        .await
        .map(Json)
}

async fn get_kernel(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<KernelRecord>, ApiError> {
    blocking(&state, move |sup| sup.get(&target)).await.map(Json)
}

#[derive(Debug, Default, Deserialize)]
struct StopParams {
    #[serde(default)]
    force: bool,
}

async fn stop_kernel(
    State(state): State<AppState>,
    Path(target): Path<String>,
    params: Result<Query<StopParams>, QueryRejection>,
) -> Result<Json<StopOutcome>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    blocking(&state, move |sup| sup.stop(&target, params.force))
        .await
        .map(Json)
}

#[derive(Debug, Default, Deserialize)]
struct MetricsParams {
    format: Option<String>,
}

async fn metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let metrics = blocking(&state, |sup| sup.metrics()).await?;
    if !wants_prometheus(params.format.as_deref(), &headers) {
        return Ok(Json(metrics).into_response());
    }
    let text = metrics
        .to_prometheus()
        .map_err(|e| ApiError::Internal(format!("metrics encoding failed: {e}")))?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE_PROMETHEUS)], text).into_response())
}

async fn registry(State(state): State<AppState>) -> Result<Json<Registry>, ApiError> {
    blocking(&state, |sup| sup.registry()).await.map(Json)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Request decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a spawn request body; an empty body means all defaults.
///
/// The `Content-Type` is not checked so `curl -d` works as-is.
fn spawn_request(body: &[u8]) -> Result<SpawnRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SpawnRequest::default());
    }
    Json::<SpawnRequest>::from_bytes(body)
        .map(|Json(request)| request)
        .map_err(|e| ApiError::BadRequest(format!("invalid spawn request: {}", e.body_text())))
}

/// `?format=prometheus|text` wins; otherwise an `Accept: text/plain`.
fn wants_prometheus(format: Option<&str>, headers: &HeaderMap) -> bool {
    match format {
        Some("prometheus" | "text") => true,
        Some(_) => false,
        None => headers
            .get(header::ACCEPT)
            .and_then(|accept| accept.to_str().ok())
            .is_some_and(|accept| accept.contains("text/plain")),
    }
}
