//! Unified error handling for the API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Application error types
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// Cooperative cancellation reaching an HTTP boundary — not an error
    /// to the caller, so it renders as 200 with a `status` body rather
    /// than the `error`/`code` shape the other variants use.
    Cancelled,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Cancelled = self {
            return (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "cancelled" })),
            )
                .into_response();
        }

        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Cancelled => unreachable!("handled above"),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log full error chain for debugging, return sanitized message to client
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Maps the orchestrator's error kinds onto HTTP status codes:
/// `ValidationError`→400, `DependencyError`→409, `Cancelled`→200 with a
/// `status:"cancelled"` body (never an HTTP error — cancellation is not
/// an error to the caller), `Internal`→500. `Tool`/`Timeout` never reach
/// an HTTP boundary on their own — they're absorbed into step results.
impl From<forge_core::OrchestrationError> for AppError {
    fn from(err: forge_core::OrchestrationError) -> Self {
        match err {
            forge_core::OrchestrationError::Validation(msg) => AppError::BadRequest(msg),
            forge_core::OrchestrationError::Dependency(msg) => AppError::Conflict(msg),
            forge_core::OrchestrationError::Cancelled => AppError::Cancelled,
            other => AppError::Internal(other.to_string()),
        }
    }
}
