//! Common error types for the dispatch crate
//!
//! These cover setup and the operator surface. Failures of an individual
//! generation request are never `AppError`s; they are reported as
//! [`crate::gateway::dispatcher::GenerationFailure`] values.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported backend kind: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Limiter closed: {0}")]
    LimiterClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a configuration validation failure
    pub fn invalid_config(message: impl Into<String>) -> Self {
        AppError::Config(config::ConfigError::Message(message.into()))
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("serialization_failed")),
            AppError::UnsupportedBackend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", Some("unsupported_backend")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::LimiterClosed(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("limiter_closed")),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
