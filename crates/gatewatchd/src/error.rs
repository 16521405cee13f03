//! HTTP-facing errors.

use crate::engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gatewatch_core::gallery::GalleryError;
use gatewatch_core::UNKNOWN_SUBJECT;
use gatewatch_hw::{ActuatorError, ActuatorState, FrameError};
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request (missing field, wrong content type).
    #[error("{0}")]
    BadRequest(String),

    /// Uploaded image could not be used.
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Device rejected the command; `state` is what the daemon kept.
    #[error("{message}")]
    Actuator { state: ActuatorState, message: String },

    #[error("{0}")]
    Internal(String),
}

impl From<ActuatorError> for ApiError {
    fn from(err: ActuatorError) -> Self {
        let message = err.to_string();
        match err {
            ActuatorError::Forward { state, .. } => Self::Actuator { state, message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Frame(FrameError::Encode(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "ENCODE_ERROR"),
            ApiError::Frame(_) => (StatusCode::BAD_REQUEST, "DECODE_ERROR"),
            ApiError::Engine(EngineError::Gallery(GalleryError::InvalidName(_))) => {
                (StatusCode::BAD_REQUEST, "INVALID_NAME")
            }
            ApiError::Engine(EngineError::Timeout(_) | EngineError::ChannelClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNAVAILABLE")
            }
            ApiError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
            ApiError::Actuator { .. } => (StatusCode::BAD_GATEWAY, "ACTUATOR_UNREACHABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "request error");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "request rejected");
        }

        let mut body = json!({
            "status": "error",
            "error_code": error_code,
            "message": message,
        });
        match &self {
            ApiError::Frame(_) => body["name"] = json!(UNKNOWN_SUBJECT),
            ApiError::Actuator { state, .. } => body["servo_cmd"] = json!(state),
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
