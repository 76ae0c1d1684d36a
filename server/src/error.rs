use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_core::GenerationError;
use serde::Serialize;
use thiserror::Error;

/// Request errors. HTTP routes render them as `{error, code}` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// A write to the peer did not happen. `Closed` and `Send` mean the
/// connection is unusable; `Encode` leaves it intact.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("could not serialize event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A malformed inbound frame. Answered with an `error` event; the session continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Why a response cycle ended in FAILED.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Error with streaming: {0}")]
    Generation(#[from] GenerationError),

    #[error("Error with streaming: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("peer disconnected")]
    PeerGone,

    #[error("response cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether a final `error` event is still worth attempting.
    pub fn peer_reachable(&self) -> bool {
        !matches!(
            self,
            SessionError::PeerGone
                | SessionError::Delivery(DeliveryError::Closed | DeliveryError::Send(_))
        )
    }
}
