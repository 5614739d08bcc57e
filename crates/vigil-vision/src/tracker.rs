//! Nearest-centroid tracker for maintaining object identity across frames.
//!
//! Uses greedy matching by center distance. Each camera owns one tracker;
//! ids are never reused within it.

use std::time::{Duration, Instant};

use vigil_models::{BoundingBox, Point};

use crate::detector::Detection;

/// Detections within this distance of an object's center update it.
pub const DEFAULT_MATCH_DISTANCE: f64 = 50.0;
/// Objects unmatched for longer than this are dropped.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2);
/// Objects must be seen on this many consecutive updates to be reported.
pub const MIN_CONSECUTIVE_FRAMES: u32 = 2;

/// An object followed across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    /// Monotonically increasing per tracker.
    pub id: u64,
    pub class: String,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub center: Point,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub active: bool,
    /// Number of updates this object has been matched on, including creation.
    pub consecutive_frames: u32,
}

impl TrackedObject {
    fn from_detection(id: u64, detection: &Detection, now: Instant) -> Self {
        Self {
            id,
            class: detection.class.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            center: detection.center(),
            first_seen: now,
            last_seen: now,
            active: true,
            consecutive_frames: 1,
        }
    }

    fn absorb(&mut self, detection: &Detection, now: Instant) {
        self.class = detection.class.clone();
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.center = detection.center();
        self.last_seen = now;
        self.consecutive_frames += 1;
    }

    /// True once the object has been seen often enough to act on.
    pub fn is_confirmed(&self) -> bool {
        self.active && self.consecutive_frames >= MIN_CONSECUTIVE_FRAMES
    }
}

/// Simple centroid tracker.
pub struct Tracker {
    /// Maximum center distance for a match
    match_distance: f64,
    /// Maximum unmatched time before an object is dropped
    stale_after: Duration,
    /// Live objects, ordered by id
    objects: Vec<TrackedObject>,
    /// Next object id to assign
    next_id: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_DISTANCE, DEFAULT_STALE_AFTER)
    }
}

impl Tracker {
    /// Create a new tracker.
    pub fn new(match_distance: f64, stale_after: Duration) -> Self {
        Self {
            match_distance,
            stale_after,
            objects: Vec::new(),
            next_id: 1,
        }
    }

    /// Update tracks with the detections of one frame.
    ///
    /// # Returns
    /// Active objects seen on at least [`MIN_CONSECUTIVE_FRAMES`] updates.
    pub fn update(&mut self, detections: &[Detection], now: Instant) -> Vec<TrackedObject> {
        let mut matched = vec![false; self.objects.len()];

        for detection in detections {
            let center = detection.center();
            let mut best: Option<(usize, f64)> = None;

            for (idx, object) in self.objects.iter().enumerate() {
                if matched[idx] || !object.active {
                    continue;
                }
                let distance = center.distance(&object.center);
                if distance < self.match_distance && best.map_or(true, |(_, d)| distance < d) {
                    best = Some((idx, distance));
                }
            }

            match best {
                Some((idx, _)) => {
                    self.objects[idx].absorb(detection, now);
                    matched[idx] = true;
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.objects.push(TrackedObject::from_detection(id, detection, now));
                    matched.push(true);
                }
            }
        }

        // Age unmatched objects
        let stale_after = self.stale_after;
        for (object, was_matched) in self.objects.iter_mut().zip(&matched) {
            if !was_matched && now.saturating_duration_since(object.last_seen) > stale_after {
                object.active = false;
            }
        }
        self.objects.retain(|o| o.active);

        self.objects
            .iter()
            .filter(|o| o.is_confirmed())
            .cloned()
            .collect()
    }

    /// Reset the tracker state. Ids keep increasing.
    pub fn reset(&mut self) {
        self.objects.clear();
    }

    /// Number of live objects, confirmed or not.
    pub fn active_count(&self) -> usize {
        self.objects.len()
    }

    /// Live objects in id order.
    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }
}
