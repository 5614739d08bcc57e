//! Model-level error types.

use thiserror::Error;

/// Result type for configuration parsing.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while ingesting camera configuration.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid camera configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid source locator: {0}")]
    InvalidSource(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }
}
