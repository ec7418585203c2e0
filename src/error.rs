//! Shared error taxonomy for the gateway (spec.md §7).
//!
//! Grounded on the teacher's `FederationError`: a `thiserror` enum carrying a
//! `status_code()`/`error_name()` pair and an `IntoResponse` impl for the
//! HTTP surface. Client-visible text on the WebSocket transport is always
//! the generic `error{reason}` message of §6 — never a raw `Display` of one
//! of these.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("upstream authentication failed: {0}")]
    AuthFailed(String),

    #[error("outbound queue full for session {session_id}")]
    Backpressure { session_id: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("session {session_id} is stale")]
    StaleSession { session_id: String },

    #[error("unsupported message type: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Protocol(_) | Self::Unsupported(_) => StatusCode::BAD_REQUEST,
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::StaleSession { .. } => StatusCode::GONE,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_name(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::Protocol(_) => "ProtocolError",
            Self::AuthFailed(_) => "AuthFailed",
            Self::Backpressure { .. } => "Backpressure",
            Self::Timeout(_) => "Timeout",
            Self::StaleSession { .. } => "StaleSession",
            Self::Unsupported(_) => "Unsupported",
            Self::Config(_) => "ConfigError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// The text to put in a `{"type":"error","data":{"reason":...}}` frame
    /// sent back to a single downstream client (spec.md §6/§7). Never
    /// exposes internal detail beyond the error's own classification name.
    pub fn client_reason(&self) -> &'static str {
        self.error_name()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_name = self.error_name();
        tracing::error!(error = %self, error_name, "gateway error");
        (
            status,
            Json(json!({ "error": error_name, "message": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_classification() {
        assert_eq!(
            GatewayError::AuthFailed("bad key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Backpressure {
                session_id: "s1".into()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::StaleSession {
                session_id: "s1".into()
            }
            .status_code(),
            StatusCode::GONE
        );
    }

    #[test]
    fn client_reason_never_leaks_detail() {
        let err = GatewayError::Internal("postgres connection string leaked".into());
        assert_eq!(err.client_reason(), "InternalError");
    }
}
