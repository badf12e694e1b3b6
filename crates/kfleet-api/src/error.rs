//! [`ApiError`] and its mapping onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kfleet_types::FleetError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no route for {0}")]
    NotFound(String),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    ///
    /// | error | status |
    /// |---|---|
    /// | `KernelNotFound`, unknown route | 404 |
    /// | malformed request | 400 |
    /// | `PortExhausted` | 503 |
    /// | `PidFileTimeout`, `PortReadyTimeout` | 504 |
    /// | everything else | 500 |
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Fleet(err) => match err {
                FleetError::KernelNotFound(_) => StatusCode::NOT_FOUND,
                FleetError::PortExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                FleetError::PidFileTimeout { .. } | FleetError::PortReadyTimeout { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable name used as the `error` field of the body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Fleet(err) => err.kind(),
            ApiError::Internal(_) => "internal",
        }
    }
}

/// `{"error": <kind>, "message": <text>}` with the mapped status.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fleet_errors_map_to_documented_statuses() {
        let cases = [
            (FleetError::KernelNotFound("k".into()), 404),
            (FleetError::PortExhausted { start: 1, upper: 2 }, 503),
            (
                FleetError::PidFileTimeout {
                    path: "x.pid".into(),
                    attempts: 10,
                },
                504,
            ),
            (
                FleetError::PortReadyTimeout {
                    port: 9555,
                    timeout: Duration::from_secs(15),
                },
                504,
            ),
            (FleetError::Cancelled, 500),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), status);
        }
    }

    #[tokio::test]
    async fn error_body_carries_kind_and_message() {
        let response = ApiError::Fleet(FleetError::KernelNotFound("kernel-x".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "kernel_not_found");
        assert_eq!(body["message"], "kernel kernel-x not found");
    }
}
