//! Error types for the hotswap engine

use thiserror::Error;

/// Main error type for the hotswap engine
///
/// Only fatal conditions live here. An expression that cannot be resolved
/// is an expected outcome and is reported through
/// [`Evaluated::Unresolvable`](crate::evaluate::Evaluated) instead.
#[derive(Error, Debug)]
pub enum HotswapError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{service} {operation} failed: {code}: {message}")]
    AwsError {
        service: String,
        operation: String,
        code: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Waiter {waiter} failed: {reason}")]
    WaiterFailed { waiter: String, reason: String },

    #[error("Waiter {waiter} timed out after {attempts} attempts")]
    WaiterTimeout { waiter: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for HotswapError {
    fn from(err: anyhow::Error) -> Self {
        HotswapError::Internal(err.to_string())
    }
}
