//! Monitor configuration.

use std::path::Path;
use std::time::Duration;

use vigil_models::CameraConfig;

use crate::error::{MonitorError, MonitorResult};

/// Process-wide monitor configuration.
///
/// Per-camera settings (rules, sensitivity, sampling) live in
/// [`CameraConfig`]; this covers what every camera shares.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Minimum time between two evaluated intrusions on one camera
    pub detection_cooldown: Duration,
    /// Minimum time between two notifying events on one camera
    pub notification_cooldown: Duration,
    /// Consecutive read failures before a camera is considered lost
    pub max_read_failures: u32,
    /// Pause after a failed frame read
    pub read_failure_backoff: Duration,
    /// Bound on a single frame read
    pub read_timeout: Duration,
    /// Bound on probing one source backend
    pub probe_timeout: Duration,
    /// How long a stop waits for the worker before aborting it
    pub stop_timeout: Duration,
    /// Maximum concurrent detector invocations across all cameras. The ONNX
    /// backend loads this many sessions.
    pub detector_parallelism: usize,
    /// Only run the detector on frames with motion
    pub motion_prefilter: bool,
    /// ONNX model for object detection
    pub model_path: Option<String>,
    /// JSON file with camera definitions
    pub cameras_file: Option<String>,
    /// Prometheus listener address
    pub metrics_addr: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detection_cooldown: Duration::from_secs(3),
            notification_cooldown: Duration::from_secs(30),
            max_read_failures: 50,
            read_failure_backoff: Duration::from_millis(500),
            read_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            detector_parallelism: 2,
            motion_prefilter: true,
            model_path: None,
            cameras_file: None,
            metrics_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl MonitorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detection_cooldown: env_secs("VIGIL_DETECTION_COOLDOWN_SECS")
                .unwrap_or(defaults.detection_cooldown),
            notification_cooldown: env_secs("VIGIL_NOTIFICATION_COOLDOWN_SECS")
                .unwrap_or(defaults.notification_cooldown),
            max_read_failures: env_parse::<u32>("VIGIL_MAX_READ_FAILURES")
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_read_failures),
            read_failure_backoff: env_parse("VIGIL_READ_FAILURE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_failure_backoff),
            read_timeout: env_secs("VIGIL_READ_TIMEOUT_SECS")
                .unwrap_or(defaults.read_timeout),
            probe_timeout: env_secs("VIGIL_PROBE_TIMEOUT_SECS")
                .unwrap_or(defaults.probe_timeout),
            stop_timeout: env_secs("VIGIL_STOP_TIMEOUT_SECS")
                .unwrap_or(defaults.stop_timeout),
            detector_parallelism: env_parse::<usize>("VIGIL_DETECTOR_PARALLELISM")
                .map(|n| n.max(1))
                .unwrap_or(defaults.detector_parallelism),
            motion_prefilter: env_parse("VIGIL_MOTION_PREFILTER").unwrap_or(defaults.motion_prefilter),
            model_path: env_string("VIGIL_MODEL_PATH"),
            cameras_file: env_string("VIGIL_CAMERAS_FILE"),
            metrics_addr: env_string("METRICS_ADDR"),
        }
    }
}

/// Load camera definitions from a JSON array file.
pub fn load_cameras(path: impl AsRef<Path>) -> MonitorResult<Vec<CameraConfig>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        MonitorError::config_error(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(CameraConfig::list_from_json(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vigil_models::RuleKind;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.detection_cooldown, Duration::from_secs(3));
        assert_eq!(config.notification_cooldown, Duration::from_secs(30));
        assert_eq!(config.max_read_failures, 50);
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
        assert!(config.motion_prefilter);
    }

    #[test]
    fn test_load_cameras() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "front", "source": "rtsp://front/live", "line": {{"start_x": 0, "start_y": 10, "end_x": 100, "end_y": 10}}}},
                {{"id": 2, "source": 0, "enabled": false}}
            ]"#
        )
        .unwrap();

        let cameras = load_cameras(file.path()).unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].rules.active_rule(), RuleKind::Line);
        assert!(!cameras[1].enabled);
    }

    #[test]
    fn test_load_cameras_errors() {
        assert!(matches!(
            load_cameras("/nonexistent/cameras.json"),
            Err(MonitorError::ConfigError(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(load_cameras(file.path()), Err(MonitorError::Model(_))));
    }
}
