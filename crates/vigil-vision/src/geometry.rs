//! Line-crossing and zone-containment tests.
//!
//! All coordinates are pixels in the evaluated frame. Zones that carry a
//! reference resolution are rescaled to that frame before testing.

use vigil_models::{DetectionLine, DetectionZone, FrameSize, Point};

/// A point closer than this to a detection line counts as crossing it.
pub const LINE_CROSSING_THRESHOLD: f64 = 20.0;

const EDGE_EPSILON: f64 = 1e-9;

/// Distance from `p` to the segment `a`-`b`.
///
/// The projection of `p` is clamped to the segment. A zero-length segment
/// degrades to the distance between `p` and `a`.
pub fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        return p.distance(&a);
    }

    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

/// True if `p` lies within [`LINE_CROSSING_THRESHOLD`] of the line.
pub fn crosses_line(p: Point, line: &DetectionLine) -> bool {
    point_to_segment_distance(p, line.start(), line.end()) < LINE_CROSSING_THRESHOLD
}

/// Even-odd containment test. Points on an edge or vertex are inside.
///
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];

        if point_to_segment_distance(p, a, b) <= EDGE_EPSILON {
            return true;
        }

        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Zone vertices expressed in `frame` coordinates.
pub fn scaled_vertices(zone: &DetectionZone, frame: FrameSize) -> Vec<Point> {
    match zone.reference {
        Some(reference) if reference.width > 0 && reference.height > 0 => {
            let sx = frame.width as f64 / reference.width as f64;
            let sy = frame.height as f64 / reference.height as f64;
            zone.points
                .iter()
                .map(|pt| Point::new(pt.x * sx, pt.y * sy))
                .collect()
        }
        _ => zone.points.clone(),
    }
}

/// Name of the first zone containing `p`, if any.
///
/// Invalid zones are skipped. Unnamed zones are reported as `zone-<index>`.
pub fn point_in_any_zone(p: Point, zones: &[DetectionZone], frame: FrameSize) -> Option<String> {
    zones
        .iter()
        .enumerate()
        .filter(|(_, zone)| zone.is_valid())
        .find(|(_, zone)| point_in_polygon(p, &scaled_vertices(zone, frame)))
        .map(|(index, zone)| zone_label(zone, index))
}

fn zone_label(zone: &DetectionZone, index: usize) -> String {
    if zone.name.trim().is_empty() {
        format!("zone-{}", index)
    } else {
        zone.name.clone()
    }
}
