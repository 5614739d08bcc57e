//! Per-camera detection rules: crossing lines and polygon zones.
//!
//! Rule configuration is owned by an external store and may arrive either as
//! a JSON object or as a JSON-encoded string. [`RuleConfig::from_json_value`]
//! is the single ingestion step that normalizes both encodings into typed
//! rules. Malformed or partial pieces are dropped rather than reported as
//! errors, so a camera with a broken zone simply behaves as if it had none.
//!
//! | Configured | Active rule |
//! |------------|-------------|
//! | zones (any line ignored) | [`RuleKind::Zone`] |
//! | line only | [`RuleKind::Line`] |
//! | nothing | [`RuleKind::Basic`] |

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geometry::{FrameSize, Point};

/// Minimum vertex count for a usable zone polygon.
pub const MIN_ZONE_VERTICES: usize = 3;

/// Which rule produced an intrusion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// A detection (or motion blob) inside a configured zone.
    Zone,
    /// A tracked object near a configured crossing line.
    Line,
    /// No geometry configured; any confident, large detection.
    Basic,
}

impl RuleKind {
    /// All rule kinds in precedence order.
    pub const ALL: &'static [RuleKind] = &[RuleKind::Zone, RuleKind::Line, RuleKind::Basic];

    /// Returns the rule name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Zone => "zone",
            RuleKind::Line => "line",
            RuleKind::Basic => "basic",
        }
    }

    /// Whether this rule needs multi-frame tracking.
    pub fn requires_tracking(&self) -> bool {
        matches!(self, RuleKind::Line)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = RuleKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zone" => Ok(RuleKind::Zone),
            "line" => Ok(RuleKind::Line),
            "basic" => Ok(RuleKind::Basic),
            _ => Err(RuleKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown rule kind: {0}")]
pub struct RuleKindParseError(String);

/// A crossing line between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionLine {
    #[serde(alias = "start_x")]
    pub x1: f64,
    #[serde(alias = "start_y")]
    pub y1: f64,
    #[serde(alias = "end_x")]
    pub x2: f64,
    #[serde(alias = "end_y")]
    pub y2: f64,
}

impl DetectionLine {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn start(&self) -> Point {
        Point::new(self.x1, self.y1)
    }

    #[inline]
    pub fn end(&self) -> Point {
        Point::new(self.x2, self.y2)
    }

    fn is_finite(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
    }
}

/// A polygon zone, optionally drawn against a reference resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionZone {
    pub name: String,
    pub points: Vec<Point>,
    /// Resolution the points were drawn against. When present, vertices are
    /// rescaled to the evaluated frame's resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<FrameSize>,
}

impl DetectionZone {
    pub fn new(name: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            points,
            reference: None,
        }
    }

    /// Attach the resolution the zone was drawn against.
    pub fn with_reference(mut self, width: u32, height: u32) -> Self {
        self.reference = Some(FrameSize::new(width, height));
        self
    }

    /// A zone needs at least three vertices to enclose anything.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= MIN_ZONE_VERTICES
    }
}

/// Typed rule configuration for one camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<DetectionLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<DetectionZone>,
}

impl RuleConfig {
    /// Rules with only a crossing line.
    pub fn with_line(line: DetectionLine) -> Self {
        Self {
            line: Some(line),
            zones: Vec::new(),
        }
    }

    /// Rules with only zones. Invalid zones are discarded.
    pub fn with_zones(zones: Vec<DetectionZone>) -> Self {
        Self {
            line: None,
            zones: zones.into_iter().filter(DetectionZone::is_valid).collect(),
        }
    }

    /// True if at least one usable zone is configured.
    pub fn has_zones(&self) -> bool {
        self.zones.iter().any(DetectionZone::is_valid)
    }

    /// The rule that governs decisions for this configuration.
    pub fn active_rule(&self) -> RuleKind {
        if self.has_zones() {
            RuleKind::Zone
        } else if self.line.is_some() {
            RuleKind::Line
        } else {
            RuleKind::Basic
        }
    }

    /// Normalize a rule block that may be an object or a JSON-encoded string.
    ///
    /// Recognized keys: `line` / `detection_line`, `zones` (array),
    /// `zone` / `detection_zone` (single legacy zone). Anything that fails to
    /// parse is treated as absent.
    pub fn from_json_value(value: &Value) -> Self {
        let value = decode_embedded(value);
        let Some(map) = value.as_object() else {
            return Self::default();
        };

        let line = map
            .get("line")
            .or_else(|| map.get("detection_line"))
            .and_then(parse_line);

        let mut zones = Vec::new();
        if let Some(list) = map.get("zones") {
            zones.extend(parse_zone_list(list));
        }
        if let Some(single) = map.get("zone").or_else(|| map.get("detection_zone")) {
            let index = zones.len();
            zones.extend(parse_zone(single, index));
        }

        Self { line, zones }
    }

    /// Build rules from separately stored `line` and `zone(s)` values, each of
    /// which may itself be a JSON-encoded string.
    pub fn from_parts(line: Option<&Value>, zones: Option<&Value>) -> Self {
        let line = line.and_then(parse_line);
        let zones = zones.map(parse_zone_list).unwrap_or_default();
        Self { line, zones }
    }
}

/// Unwrap a value that holds JSON text into the parsed value.
fn decode_embedded(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn parse_line(value: &Value) -> Option<DetectionLine> {
    let value = decode_embedded(value);
    serde_json::from_value::<DetectionLine>(value)
        .ok()
        .filter(DetectionLine::is_finite)
}

/// Accepts an array of zones, a single zone object, or a string of either.
fn parse_zone_list(value: &Value) -> Vec<DetectionZone> {
    match decode_embedded(value) {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| parse_zone(item, index))
            .collect(),
        single @ Value::Object(_) => parse_zone(&single, 0).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Vertex in either `{ "x": .., "y": .. }` or `[x, y]` form.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Object { x: f64, y: f64 },
    Pair([f64; 2]),
}

impl From<RawPoint> for Point {
    fn from(raw: RawPoint) -> Self {
        match raw {
            RawPoint::Object { x, y } => Point::new(x, y),
            RawPoint::Pair([x, y]) => Point::new(x, y),
        }
    }
}

/// Reference resolution as serialized by [`DetectionZone`].
#[derive(Deserialize)]
struct RawReference {
    #[serde(alias = "w")]
    width: f64,
    #[serde(alias = "h")]
    height: f64,
}

#[derive(Deserialize)]
struct RawZone {
    #[serde(default, alias = "id")]
    name: Option<String>,
    points: Vec<RawPoint>,
    #[serde(default, alias = "reference_width", alias = "refW")]
    ref_w: Option<f64>,
    #[serde(default, alias = "reference_height", alias = "refH")]
    ref_h: Option<f64>,
    #[serde(default)]
    reference: Option<RawReference>,
}

fn reference_size(width: f64, height: f64) -> Option<FrameSize> {
    (width.is_finite() && height.is_finite() && width >= 1.0 && height >= 1.0)
        .then(|| FrameSize::new(width.round() as u32, height.round() as u32))
}

fn parse_zone(value: &Value, index: usize) -> Option<DetectionZone> {
    let raw: RawZone = serde_json::from_value(decode_embedded(value)).ok()?;

    let points: Vec<Point> = raw.points.into_iter().map(Point::from).collect();
    if points.len() < MIN_ZONE_VERTICES || points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return None;
    }

    // Flat `ref_w`/`ref_h` win over a nested `reference` object
    let reference = match (raw.ref_w, raw.ref_h) {
        (Some(w), Some(h)) => reference_size(w, h),
        _ => raw.reference.and_then(|r| reference_size(r.width, r.height)),
    };

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("zone-{}", index));

    Some(DetectionZone {
        name,
        points,
        reference,
    })
}
