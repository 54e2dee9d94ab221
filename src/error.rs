use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::media::MediaKind;

/// Bridge-wide error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Video header error: {0}")]
    Header(String),

    #[error("Failed to spawn {kind} encoder: {source}")]
    Spawn {
        kind: MediaKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} stream fault: {reason}")]
    StreamFault { kind: MediaKind, reason: String },

    #[error("{kind} encoder exited unexpectedly ({status})")]
    EncoderExit { kind: MediaKind, status: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error response body for the signaling endpoints
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl BridgeError {
    fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error ends the whole bridge rather than a single request
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BridgeError::Unauthorized | BridgeError::NotFound(_) | BridgeError::BadRequest(_)
        )
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::warn!(
            status = status.as_u16(),
            error_message = %body.message,
            "Signaling request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
