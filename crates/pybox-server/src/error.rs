//! Error types for the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use pybox_core::{SandboxError, StagingError, ValidationError};
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Body is not a well-formed execution request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A reference file could not be downloaded
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Execution runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::Validation(_)
            | ServerError::Staging(_) => 400,
            ServerError::RuntimeUnavailable(_) => 503,
            ServerError::Config(_) | ServerError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Validation(_) => "validation_error",
            ServerError::Staging(_) => "staging_error",
            ServerError::RuntimeUnavailable(_) => "runtime_unavailable",
            ServerError::Config(_) => "config_error",
            ServerError::Internal(_) => "internal_error",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Validation(_) => "Invalid request",
            ServerError::Staging(_) => "Failed to download reference files",
            ServerError::RuntimeUnavailable(_) => "Execution runtime unavailable",
            ServerError::Config(_) | ServerError::Internal(_) => "Internal server error",
        }
    }
}

impl From<SandboxError> for ServerError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::Validation(e) => ServerError::Validation(e),
            SandboxError::Staging(e) => ServerError::Staging(e),
            SandboxError::RuntimeUnavailable(message) => ServerError::RuntimeUnavailable(message),
            SandboxError::Internal(message) => ServerError::Internal(message),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{} ({}): {}", self.summary(), self.error_type(), self);
        } else {
            log::warn!("{} ({}): {}", self.summary(), self.error_type(), self);
        }

        (
            status,
            Json(json!({
                "error": self.summary(),
                "details": self.to_string(),
                "timestamp": chrono::Utc::now()
            })),
        )
            .into_response()
    }
}
