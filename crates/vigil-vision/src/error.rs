//! Error types for capture and vision operations.

use thiserror::Error;

/// Result type for vision operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while capturing or analyzing frames.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Frame source unavailable: {source_name} ({attempts} backend(s) tried)")]
    SourceUnavailable { source_name: String, attempts: usize },

    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Object detection failed: {0}")]
    DetectionFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create a source unavailable error.
    pub fn source_unavailable(source_name: impl Into<String>, attempts: usize) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            attempts,
        }
    }

    /// Create a read failure error.
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors after which the same source may still deliver frames.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ReadFailed(_) | Self::Timeout(_) | Self::Io(_))
    }
}
