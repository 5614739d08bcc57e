//! Camera identity, frame-source locators and per-camera configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{ModelError, ModelResult};
use crate::rules::RuleConfig;

/// Lowest confidence threshold a sensitivity value can map to.
pub const MIN_CONFIDENCE_THRESHOLD: f64 = 0.2;
/// Highest confidence threshold a sensitivity value can map to.
pub const MAX_CONFIDENCE_THRESHOLD: f64 = 0.8;

pub const DEFAULT_SENSITIVITY: i64 = 50;
pub const DEFAULT_TARGET_FPS: f64 = 15.0;
pub const DEFAULT_SAMPLE_EVERY_N_FRAMES: u32 = 5;

/// Unique camera identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for CameraId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Where a camera's frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SourceLocator {
    /// Local capture device index (e.g. `/dev/video0` on Linux).
    Device(u32),
    /// Network stream URL or file path.
    Url(String),
}

/// URL schemes treated as live network streams.
const NETWORK_SCHEMES: &[&str] = &["rtsp", "rtsps", "rtmp", "http", "https", "udp", "tcp", "srt"];

impl SourceLocator {
    /// True for RTSP/HTTP/... stream URLs.
    pub fn is_network(&self) -> bool {
        self.scheme()
            .map(|s| NETWORK_SCHEMES.contains(&s.as_str()))
            .unwrap_or(false)
    }

    /// True for RTSP URLs, which support transport selection.
    pub fn is_rtsp(&self) -> bool {
        matches!(self.scheme().as_deref(), Some("rtsp") | Some("rtsps"))
    }

    /// Lowercase URL scheme, if the locator parses as a URL.
    pub fn scheme(&self) -> Option<String> {
        match self {
            SourceLocator::Device(_) => None,
            SourceLocator::Url(raw) => Url::parse(raw).ok().map(|u| u.scheme().to_lowercase()),
        }
    }

    /// Locator with credentials removed, safe for logs.
    pub fn redacted(&self) -> String {
        match self {
            SourceLocator::Device(index) => format!("device:{}", index),
            SourceLocator::Url(raw) => match Url::parse(raw) {
                Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
                    let _ = url.set_username("");
                    let _ = url.set_password(None);
                    url.to_string()
                }
                _ => raw.clone(),
            },
        }
    }
}

impl FromStr for SourceLocator {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ModelError::invalid_source("empty source locator"));
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            return trimmed
                .parse::<u32>()
                .map(SourceLocator::Device)
                .map_err(|_| ModelError::invalid_source(trimmed));
        }
        Ok(SourceLocator::Url(trimmed.to_string()))
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// Map a 0-100 sensitivity to a detector confidence threshold.
///
/// Higher sensitivity accepts lower-confidence detections. 50 maps to 0.5.
pub fn sensitivity_to_confidence(sensitivity: i64) -> f64 {
    let s = sensitivity.clamp(0, 100) as f64 / 100.0;
    (MAX_CONFIDENCE_THRESHOLD - 0.6 * s).clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD)
}

/// Read-only configuration for one monitored camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraConfig {
    pub id: CameraId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: SourceLocator,
    /// Approximate capture loop rate.
    pub target_fps: f64,
    /// 0-100, clamped on ingestion.
    pub sensitivity: i64,
    /// Run the decision pipeline on every Nth captured frame (>= 1).
    pub sample_every_n_frames: u32,
    pub enabled: bool,
    #[serde(flatten)]
    pub rules: RuleConfig,
}

impl CameraConfig {
    /// Config with defaults and basic-mode rules.
    pub fn new(id: impl Into<CameraId>, source: SourceLocator) -> Self {
        Self {
            id: id.into(),
            name: None,
            source,
            target_fps: DEFAULT_TARGET_FPS,
            sensitivity: DEFAULT_SENSITIVITY,
            sample_every_n_frames: DEFAULT_SAMPLE_EVERY_N_FRAMES,
            enabled: true,
            rules: RuleConfig::default(),
        }
    }

    pub fn with_rules(mut self, rules: RuleConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: i64) -> Self {
        self.sensitivity = sensitivity.clamp(0, 100);
        self
    }

    pub fn with_sampling(mut self, sample_every_n_frames: u32) -> Self {
        self.sample_every_n_frames = sample_every_n_frames.max(1);
        self
    }

    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = sanitize_fps(fps);
        self
    }

    /// Detector confidence threshold derived from sensitivity.
    pub fn confidence_threshold(&self) -> f64 {
        sensitivity_to_confidence(self.sensitivity)
    }

    /// Parse one camera definition from JSON.
    pub fn from_json(value: Value) -> ModelResult<Self> {
        let raw: RawCameraConfig = serde_json::from_value(value)?;
        raw.try_into()
    }

    /// Parse a JSON array of camera definitions.
    pub fn list_from_json(text: &str) -> ModelResult<Vec<Self>> {
        let raw: Vec<RawCameraConfig> = serde_json::from_str(text)?;
        raw.into_iter().map(CameraConfig::try_from).collect()
    }

    /// JSON schema of the accepted camera definition format.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RawCameraConfig)
    }
}

fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps.min(120.0)
    } else {
        DEFAULT_TARGET_FPS
    }
}

/// Camera definition as it arrives from the configuration store.
#[derive(Debug, Deserialize, JsonSchema)]
struct RawCameraConfig {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(alias = "stream_url", alias = "source_locator")]
    source: Value,
    #[serde(default, alias = "fps", alias = "targetFps")]
    target_fps: Option<f64>,
    #[serde(default)]
    sensitivity: Option<i64>,
    #[serde(default, alias = "sampleEveryNFrames")]
    sample_every_n_frames: Option<u32>,
    #[serde(default, alias = "detection_enabled")]
    enabled: Option<bool>,
    /// Combined rule block, object or JSON-encoded string.
    #[serde(default)]
    rules: Option<Value>,
    #[serde(default, alias = "detection_line")]
    line: Option<Value>,
    #[serde(default)]
    zones: Option<Value>,
    #[serde(default, alias = "detection_zone")]
    zone: Option<Value>,
}

impl TryFrom<RawCameraConfig> for CameraConfig {
    type Error = ModelError;

    fn try_from(raw: RawCameraConfig) -> Result<Self, Self::Error> {
        let id = match raw.id {
            Value::String(s) if !s.trim().is_empty() => CameraId(s),
            Value::Number(n) => CameraId(n.to_string()),
            other => return Err(ModelError::invalid_config(format!("invalid camera id: {}", other))),
        };

        let source = match raw.source {
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(SourceLocator::Device)
                .ok_or_else(|| ModelError::invalid_source(n.to_string()))?,
            Value::String(s) => s.parse()?,
            other => return Err(ModelError::invalid_source(other.to_string())),
        };

        let mut rules = match &raw.rules {
            Some(block) => RuleConfig::from_json_value(block),
            None => RuleConfig::default(),
        };
        let loose = RuleConfig::from_parts(raw.line.as_ref(), raw.zones.as_ref().or(raw.zone.as_ref()));
        if rules.line.is_none() {
            rules.line = loose.line;
        }
        if rules.zones.is_empty() {
            rules.zones = loose.zones;
        }

        Ok(CameraConfig {
            id,
            name: raw.name,
            source,
            target_fps: sanitize_fps(raw.target_fps.unwrap_or(DEFAULT_TARGET_FPS)),
            sensitivity: raw.sensitivity.unwrap_or(DEFAULT_SENSITIVITY).clamp(0, 100),
            sample_every_n_frames: raw
                .sample_every_n_frames
                .unwrap_or(DEFAULT_SAMPLE_EVERY_N_FRAMES)
                .max(1),
            enabled: raw.enabled.unwrap_or(true),
            rules,
        })
    }
}

impl<'de> Deserialize<'de> for CameraConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawCameraConfig::deserialize(deserializer)?;
        raw.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::FrameSize;
    use crate::rules::{DetectionLine, RuleKind};
    use serde_json::json;

    #[test]
    fn test_sensitivity_mapping() {
        assert!((sensitivity_to_confidence(50) - 0.5).abs() < 1e-9);
        assert!((sensitivity_to_confidence(0) - 0.8).abs() < 1e-9);
        assert!((sensitivity_to_confidence(100) - 0.2).abs() < 1e-9);
        assert!((sensitivity_to_confidence(-20) - 0.8).abs() < 1e-9);
        assert!((sensitivity_to_confidence(400) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_source_locator_parse() {
        assert_eq!("0".parse::<SourceLocator>().unwrap(), SourceLocator::Device(0));
        assert_eq!(" 2 ".parse::<SourceLocator>().unwrap(), SourceLocator::Device(2));
        let rtsp: SourceLocator = "rtsp://user:pw@10.0.0.5/stream1".parse().unwrap();
        assert!(rtsp.is_network());
        assert!(rtsp.is_rtsp());
        assert_eq!(rtsp.redacted(), "rtsp://10.0.0.5/stream1");
        let file: SourceLocator = "/videos/lobby.mp4".parse().unwrap();
        assert!(!file.is_network());
        assert!("".parse::<SourceLocator>().is_err());
    }

    #[test]
    fn test_camera_config_flat_format() {
        let config = CameraConfig::from_json(json!({
            "id": 7,
            "source": "rtsp://cam/stream",
            "sensitivity": 150,
            "sampleEveryNFrames": 0,
            "targetFps": 10,
            "line": {"x1": 0, "y1": 100, "x2": 200, "y2": 100}
        }))
        .unwrap();

        assert_eq!(config.id, CameraId::new("7"));
        assert_eq!(config.sensitivity, 100);
        assert_eq!(config.sample_every_n_frames, 1);
        assert!((config.target_fps - 10.0).abs() < 1e-9);
        assert_eq!(config.rules.line, Some(DetectionLine::new(0.0, 100.0, 200.0, 100.0)));
        assert_eq!(config.rules.active_rule(), RuleKind::Line);
    }

    #[test]
    fn test_camera_config_legacy_format() {
        let zone = json!({"points": [{"x": 0, "y": 0}, {"x": 10, "y": 0}, {"x": 10, "y": 10}]});
        let config = CameraConfig::from_json(json!({
            "id": "lobby",
            "stream_url": 0,
            "fps": 15,
            "detection_enabled": false,
            "detection_zone": zone.to_string()
        }))
        .unwrap();

        assert_eq!(config.source, SourceLocator::Device(0));
        assert!(!config.enabled);
        assert_eq!(config.rules.active_rule(), RuleKind::Zone);
        assert_eq!(config.sample_every_n_frames, DEFAULT_SAMPLE_EVERY_N_FRAMES);
    }

    #[test]
    fn test_camera_config_rules_block_as_string() {
        let rules = json!({"zones": [{"name": "yard", "points": [[0, 0], [4, 0], [4, 4]]}]}).to_string();
        let config = CameraConfig::from_json(json!({
            "id": "yard-cam",
            "source": "rtsp://yard/live",
            "rules": rules
        }))
        .unwrap();
        assert_eq!(config.rules.zones[0].name, "yard");
    }

    #[test]
    fn test_camera_config_rejects_bad_identity() {
        assert!(CameraConfig::from_json(json!({"id": "", "source": "0"})).is_err());
        assert!(CameraConfig::from_json(json!({"id": "a", "source": -1})).is_err());
        assert!(CameraConfig::from_json(json!({"id": "a"})).is_err());
    }

    #[test]
    fn test_camera_list_round_trip_shape() {
        let list = CameraConfig::list_from_json(
            r#"[{"id": "a", "source": "1"}, {"id": "b", "source": "rtsp://b/live", "enabled": false}]"#,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].source, SourceLocator::Device(1));

        let serialized = serde_json::to_value(&list[1]).unwrap();
        let reparsed = CameraConfig::from_json(serialized).unwrap();
        assert_eq!(reparsed, list[1]);
    }

    #[test]
    fn test_camera_with_rules_round_trips() {
        let config = CameraConfig::from_json(json!({
            "id": "dock",
            "source": "rtsp://dock/live",
            "line": {"start_x": 0, "start_y": 240, "end_x": 640, "end_y": 240},
            "zones": [{"name": "door", "points": [[0, 0], [50, 0], [50, 50]], "ref_w": 100, "ref_h": 100}]
        }))
        .unwrap();
        assert_eq!(config.rules.zones[0].reference, Some(FrameSize::new(100, 100)));

        let reparsed = CameraConfig::from_json(serde_json::to_value(&config).unwrap()).unwrap();
        assert_eq!(reparsed.rules.zones[0].reference, Some(FrameSize::new(100, 100)));
        assert_eq!(reparsed.rules.line, Some(DetectionLine::new(0.0, 240.0, 640.0, 240.0)));
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_schema_mentions_source() {
        let schema = serde_json::to_string(&CameraConfig::json_schema()).unwrap();
        assert!(schema.contains("source"));
    }
}
