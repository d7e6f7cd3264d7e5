//! Error taxonomy for the orchestration engine.
//!
//! Kinds, not exception types: `ValidationError` and `Internal` are raised
//! to callers; `ToolError`/`TimeoutError` are absorbed into step results;
//! `Cancelled` is a terminal status, never an error to the caller.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum OrchestrationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Tool(_) => "ToolError",
            Self::Timeout(_) => "TimeoutError",
            Self::Dependency(_) => "DependencyError",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<anyhow::Error> for OrchestrationError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}

impl From<rusqlite::Error> for OrchestrationError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(format!("sqlite: {e}"))
    }
}

impl From<std::io::Error> for OrchestrationError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
