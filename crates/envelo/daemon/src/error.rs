//! Error types for envelod

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use envelo_agent::{AgentError, Evaluation};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Agent startup or shutdown error
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Boundary document error
    #[error("Boundary error: {0}")]
    Boundary(#[from] envelo_boundary::BoundaryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// No agent attached, or the agent has stopped
    #[error("Enforcement agent unavailable")]
    AgentUnavailable,

    /// The action violates the envelope
    #[error("Action blocked: {}", .0.violations.join("; "))]
    Blocked(Box<Evaluation>),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::AgentUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "AGENT_UNAVAILABLE"),
            ApiError::Blocked(_) => (StatusCode::FORBIDDEN, "BLOCKED"),
        };

        let details = match &self {
            ApiError::Blocked(evaluation) => serde_json::to_value(evaluation.as_ref()).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
