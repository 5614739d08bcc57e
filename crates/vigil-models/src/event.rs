//! Intrusion events handed to the external event sink.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::camera::CameraId;
use crate::rules::RuleKind;

/// Identifies the captured frame that triggered an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FrameRef {
    /// Index of the frame since the monitor started (1-based).
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
}

/// A positive intrusion decision for one camera.
///
/// The core does not retain events; they are emitted once and owned by the
/// sink from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntrusionEvent {
    pub id: Uuid,
    pub camera_id: CameraId,
    pub timestamp: DateTime<Utc>,
    /// Confidence of the triggering detection (0 for motion-only zone hits).
    pub confidence: f64,
    pub rule_kind: RuleKind,
    /// Zone that matched, for zone events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
    /// Number of objects that satisfied the rule on this frame.
    pub object_count: usize,
    pub frame_ref: FrameRef,
    /// False while the notification cooldown is closed. The event is still
    /// recorded; only outbound alerting should be skipped.
    pub notify: bool,
}

impl IntrusionEvent {
    pub fn new(
        camera_id: CameraId,
        rule_kind: RuleKind,
        confidence: f64,
        frame_ref: FrameRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id,
            timestamp: Utc::now(),
            confidence,
            rule_kind,
            zone_name: None,
            object_count: 0,
            frame_ref,
            notify: true,
        }
    }

    pub fn with_zone(mut self, zone_name: Option<String>) -> Self {
        self.zone_name = zone_name;
        self
    }

    pub fn with_object_count(mut self, count: usize) -> Self {
        self.object_count = count;
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Short human-readable summary for logs and alert subjects.
    pub fn summary(&self) -> String {
        match (&self.rule_kind, &self.zone_name) {
            (RuleKind::Zone, Some(zone)) => format!(
                "Intrusion in zone '{}' on camera {} ({:.0}% confidence)",
                zone,
                self.camera_id,
                self.confidence * 100.0
            ),
            (kind, _) => format!(
                "Intrusion ({}) on camera {} ({:.0}% confidence)",
                kind,
                self.camera_id,
                self.confidence * 100.0
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_ref() -> FrameRef {
        FrameRef {
            frame_index: 42,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_event_serializes_snake_case_kind() {
        let event = IntrusionEvent::new(CameraId::new("cam-1"), RuleKind::Line, 0.87, frame_ref())
            .with_object_count(1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["rule_kind"], "line");
        assert_eq!(json["camera_id"], "cam-1");
        assert_eq!(json["frame_ref"]["frame_index"], 42);
        assert!(json.get("zone_name").is_none());
        assert_eq!(json["notify"], true);
    }

    #[test]
    fn test_event_summary() {
        let event = IntrusionEvent::new(CameraId::new("3"), RuleKind::Zone, 0.9, frame_ref())
            .with_zone(Some("gate".into()))
            .with_notify(false);
        assert_eq!(event.summary(), "Intrusion in zone 'gate' on camera 3 (90% confidence)");
        assert!(!event.notify);

        let basic = IntrusionEvent::new(CameraId::new("3"), RuleKind::Basic, 0.6, frame_ref());
        assert_eq!(basic.summary(), "Intrusion (basic) on camera 3 (60% confidence)");
    }

    #[test]
    fn test_event_ids_unique() {
        let a = IntrusionEvent::new(CameraId::new("1"), RuleKind::Basic, 0.7, frame_ref());
        let b = IntrusionEvent::new(CameraId::new("1"), RuleKind::Basic, 0.7, frame_ref());
        assert_ne!(a.id, b.id);
    }
}
