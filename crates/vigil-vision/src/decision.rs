//! Intrusion decision precedence.
//!
//! | Rules configured | Evaluated on | Intrusion when |
//! |------------------|--------------|----------------|
//! | zone(s) | raw detections, else motion centroid | a center lies in a zone |
//! | line only | tracked objects | a tracked center is near the line |
//! | neither | raw detections | confidence >= 0.6 and area > 2000 px² |
//!
//! Zones take precedence: when one is configured, the line and basic rules
//! are never consulted.

use std::time::Instant;

use vigil_models::{FrameSize, Point, RuleConfig, RuleKind};

use crate::detector::Detection;
use crate::geometry::{crosses_line, point_in_any_zone};
use crate::tracker::Tracker;

/// Minimum confidence for a basic-mode intrusion.
pub const BASIC_MIN_CONFIDENCE: f64 = 0.6;
/// Minimum bounding box area (px²) for a basic-mode intrusion.
pub const BASIC_MIN_AREA: f64 = 2000.0;

/// Everything observed on one sampled frame.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub detections: &'a [Detection],
    /// Centroid of significant motion, if any.
    pub motion_centroid: Option<Point>,
    pub frame_size: FrameSize,
    pub now: Instant,
}

/// Result of evaluating one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub intrusion: bool,
    pub kind: Option<RuleKind>,
    pub confidence: f64,
    /// Matched zone for zone intrusions.
    pub zone: Option<String>,
    /// Objects that satisfied the rule.
    pub object_count: usize,
}

impl Decision {
    /// No intrusion.
    pub fn none() -> Self {
        Self::default()
    }

    fn hit(kind: RuleKind, confidence: f64, object_count: usize) -> Self {
        Self {
            intrusion: true,
            kind: Some(kind),
            confidence,
            zone: None,
            object_count,
        }
    }
}

/// Apply the precedence table to one frame.
///
/// The tracker is only updated in line mode.
pub fn decide(input: &DecisionInput<'_>, rules: &RuleConfig, tracker: &mut Tracker) -> Decision {
    match rules.active_rule() {
        RuleKind::Zone => decide_zone(input, rules),
        RuleKind::Line => decide_line(input, rules, tracker),
        RuleKind::Basic => decide_basic(input),
    }
}

fn decide_zone(input: &DecisionInput<'_>, rules: &RuleConfig) -> Decision {
    if input.detections.is_empty() {
        return input
            .motion_centroid
            .and_then(|centroid| point_in_any_zone(centroid, &rules.zones, input.frame_size))
            .map(|zone| Decision {
                zone: Some(zone),
                ..Decision::hit(RuleKind::Zone, 0.0, 0)
            })
            .unwrap_or_default();
    }

    let hits: Vec<(&Detection, String)> = input
        .detections
        .iter()
        .filter_map(|d| point_in_any_zone(d.center(), &rules.zones, input.frame_size).map(|z| (d, z)))
        .collect();

    match hits.first() {
        Some((first, zone)) => Decision {
            zone: Some(zone.clone()),
            ..Decision::hit(RuleKind::Zone, first.confidence, hits.len())
        },
        None => Decision::none(),
    }
}

fn decide_line(input: &DecisionInput<'_>, rules: &RuleConfig, tracker: &mut Tracker) -> Decision {
    let tracked = tracker.update(input.detections, input.now);
    let Some(line) = rules.line.as_ref() else {
        return Decision::none();
    };

    let crossing: Vec<_> = tracked.iter().filter(|o| crosses_line(o.center, line)).collect();
    if crossing.is_empty() {
        return Decision::none();
    }

    let confidence = crossing.iter().map(|o| o.confidence).fold(0.0, f64::max);
    Decision::hit(RuleKind::Line, confidence, crossing.len())
}

fn decide_basic(input: &DecisionInput<'_>) -> Decision {
    input
        .detections
        .iter()
        .find(|d| d.confidence >= BASIC_MIN_CONFIDENCE && d.area() > BASIC_MIN_AREA)
        .map(|d| Decision::hit(RuleKind::Basic, d.confidence, 1))
        .unwrap_or_default()
}

/// Per-camera decision state: the camera's rules and its tracker.
pub struct DecisionEngine {
    rules: RuleConfig,
    tracker: Tracker,
}

impl DecisionEngine {
    pub fn new(rules: RuleConfig) -> Self {
        Self::with_tracker(rules, Tracker::default())
    }

    pub fn with_tracker(rules: RuleConfig, tracker: Tracker) -> Self {
        Self { rules, tracker }
    }

    /// Evaluate one frame.
    pub fn evaluate(&mut self, input: &DecisionInput<'_>) -> Decision {
        decide(input, &self.rules, &mut self.tracker)
    }

    pub fn active_rule(&self) -> RuleKind {
        self.rules.active_rule()
    }

    /// True when the detector should run even without motion, so that
    /// stationary tracked objects keep being refreshed.
    pub fn needs_detections_without_motion(&self) -> bool {
        self.active_rule() == RuleKind::Line && self.tracker.active_count() > 0
    }

    pub fn tracked_object_count(&self) -> usize {
        self.tracker.active_count()
    }

    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_models::{BoundingBox, DetectionLine, DetectionZone};

    const FRAME: FrameSize = FrameSize {
        width: 640,
        height: 480,
    };

    fn detection_at(cx: f64, cy: f64, confidence: f64) -> Detection {
        Detection::new("person", BoundingBox::new(cx - 25.0, cy - 50.0, 50.0, 100.0), confidence)
    }

    fn input<'a>(detections: &'a [Detection], motion: Option<Point>, now: Instant) -> DecisionInput<'a> {
        DecisionInput {
            detections,
            motion_centroid: motion,
            frame_size: FRAME,
            now,
        }
    }

    fn zone_rules() -> RuleConfig {
        let zone = DetectionZone::new(
            "driveway",
            vec![
                Point::new(300.0, 300.0),
                Point::new(400.0, 300.0),
                Point::new(400.0, 400.0),
                Point::new(300.0, 400.0),
            ],
        );
        RuleConfig {
            line: Some(DetectionLine::new(0.0, 100.0, 200.0, 100.0)),
            zones: vec![zone],
        }
    }

    #[test]
    fn test_zone_detection_inside() {
        let rules = zone_rules();
        let mut tracker = Tracker::default();
        let dets = [detection_at(350.0, 350.0, 0.7)];

        let decision = decide(&input(&dets, None, Instant::now()), &rules, &mut tracker);
        assert!(decision.intrusion);
        assert_eq!(decision.kind, Some(RuleKind::Zone));
        assert_eq!(decision.zone.as_deref(), Some("driveway"));
        assert!((decision.confidence - 0.7).abs() < 1e-9);
        assert_eq!(decision.object_count, 1);
    }

    #[test]
    fn test_zone_takes_precedence_over_line() {
        let rules = zone_rules();
        let mut tracker = Tracker::default();
        let start = Instant::now();
        // Right on the line, outside every zone
        let dets = [detection_at(100.0, 100.0, 0.95)];

        for i in 0..4 {
            let now = start + Duration::from_millis(100 * i);
            let decision = decide(&input(&dets, None, now), &rules, &mut tracker);
            assert!(!decision.intrusion);
        }
        assert_eq!(tracker.active_count(), 0, "tracker untouched in zone mode");
    }

    #[test]
    fn test_zone_falls_back_to_motion_only_without_detections() {
        let rules = zone_rules();
        let mut tracker = Tracker::default();
        let now = Instant::now();

        let decision = decide(&input(&[], Some(Point::new(320.0, 320.0)), now), &rules, &mut tracker);
        assert!(decision.intrusion);
        assert_eq!(decision.kind, Some(RuleKind::Zone));
        assert_eq!(decision.object_count, 0);

        // Detections present but outside: motion inside the zone is ignored
        let dets = [detection_at(50.0, 50.0, 0.9)];
        let decision = decide(&input(&dets, Some(Point::new(320.0, 320.0)), now), &rules, &mut tracker);
        assert!(!decision.intrusion);

        let decision = decide(&input(&[], Some(Point::new(10.0, 10.0)), now), &rules, &mut tracker);
        assert!(!decision.intrusion);
    }

    #[test]
    fn test_line_crossing_over_three_frames() {
        let rules = RuleConfig::with_line(DetectionLine::new(0.0, 100.0, 200.0, 100.0));
        let mut engine = DecisionEngine::new(rules);
        let start = Instant::now();

        let path = [(50.0, 50.0), (50.0, 77.0), (50.0, 105.0)];
        let mut decisions = Vec::new();
        for (i, (x, y)) in path.iter().enumerate() {
            let dets = [detection_at(*x, *y, 0.8)];
            let now = start + Duration::from_millis(200 * i as u64);
            decisions.push(engine.evaluate(&input(&dets, None, now)));
        }

        assert!(!decisions[0].intrusion);
        assert!(!decisions[1].intrusion);
        assert!(decisions[2].intrusion);
        assert_eq!(decisions[2].kind, Some(RuleKind::Line));
        assert_eq!(decisions[2].object_count, 1);
        assert_eq!(engine.tracked_object_count(), 1);
        assert!(engine.needs_detections_without_motion());
    }

    #[test]
    fn test_line_requires_confirmed_track() {
        let rules = RuleConfig::with_line(DetectionLine::new(0.0, 100.0, 200.0, 100.0));
        let mut engine = DecisionEngine::new(rules);
        let dets = [detection_at(50.0, 100.0, 0.9)];

        let decision = engine.evaluate(&input(&dets, None, Instant::now()));
        assert!(!decision.intrusion, "single noisy detection must not trigger");
    }

    #[test]
    fn test_basic_mode_thresholds() {
        let rules = RuleConfig::default();
        let mut tracker = Tracker::default();
        let now = Instant::now();

        // 50x100 box = 5000 px²
        let strong = [detection_at(100.0, 100.0, 0.9)];
        let decision = decide(&input(&strong, None, now), &rules, &mut tracker);
        assert!(decision.intrusion);
        assert_eq!(decision.kind, Some(RuleKind::Basic));

        let weak = [detection_at(100.0, 100.0, 0.3)];
        assert!(!decide(&input(&weak, None, now), &rules, &mut tracker).intrusion);

        let tiny = [Detection::new("person", BoundingBox::new(0.0, 0.0, 40.0, 50.0), 0.9)];
        assert!(!decide(&input(&tiny, None, now), &rules, &mut tracker).intrusion);

        assert!(!decide(&input(&[], Some(Point::new(1.0, 1.0)), now), &rules, &mut tracker).intrusion);
    }

    #[test]
    fn test_basic_mode_picks_first_qualifying_detection() {
        let rules = RuleConfig::default();
        let mut tracker = Tracker::default();
        let dets = [detection_at(10.0, 10.0, 0.4), detection_at(200.0, 200.0, 0.65), detection_at(300.0, 300.0, 0.99)];
        let decision = decide(&input(&dets, None, Instant::now()), &rules, &mut tracker);
        assert!((decision.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_zone_falls_through_to_line() {
        let rules = RuleConfig {
            line: Some(DetectionLine::new(0.0, 100.0, 200.0, 100.0)),
            zones: vec![DetectionZone::new("bad", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)])],
        };
        let engine = DecisionEngine::new(rules);
        assert_eq!(engine.active_rule(), RuleKind::Line);
    }
}
