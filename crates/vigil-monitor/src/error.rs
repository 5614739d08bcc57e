//! Monitor error types.

use thiserror::Error;
use vigil_models::{CameraId, ModelError};
use vigil_vision::MediaError;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Frame source unavailable for camera {camera_id}: {source}")]
    SourceUnavailable {
        camera_id: CameraId,
        source: MediaError,
    },

    #[error("Frame source lost for camera {camera_id} after {failures} consecutive read failures")]
    SourceLost { camera_id: CameraId, failures: u32 },

    #[error("Camera {0} is disabled")]
    CameraDisabled(CameraId),

    #[error("Camera {0} is not being monitored")]
    NotRunning(CameraId),

    #[error("Event sink failed: {0}")]
    SinkFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn source_unavailable(camera_id: &CameraId, source: MediaError) -> Self {
        Self::SourceUnavailable {
            camera_id: camera_id.clone(),
            source,
        }
    }

    pub fn sink_failed(msg: impl Into<String>) -> Self {
        Self::SinkFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// True if restarting the camera later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::SourceUnavailable { .. } | MonitorError::SourceLost { .. }
        )
    }
}
