//! Object detection capability and the shared detector pool.
//!
//! A [`Detector`] is any blocking backend that turns an RGB frame into a list
//! of [`Detection`]s. Cameras never call a backend directly: every call goes
//! through a [`DetectorPool`], which bounds concurrent inference across all
//! cameras and turns failures into "no detections this frame".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use image::RgbImage;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use vigil_models::{BoundingBox, Point};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// Classes that can trigger an intrusion.
pub const RELEVANT_CLASSES: &[&str] = &["person", "car", "truck", "bus", "motorcycle", "bicycle"];

/// A single object found in a frame, in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Class label, e.g. "person".
    pub class: String,
    pub bbox: BoundingBox,
    /// Detection confidence [0, 1]
    pub confidence: f64,
}

impl Detection {
    pub fn new(class: impl Into<String>, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            class: class.into(),
            bbox,
            confidence,
        }
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.bbox.center()
    }

    /// Bounding box area in pixels.
    #[inline]
    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    /// True if the class is on the intrusion allow-list.
    pub fn is_relevant(&self) -> bool {
        RELEVANT_CLASSES.contains(&self.class.as_str())
    }
}

/// Blocking object detection backend.
///
/// Implementations must be safe to call from several blocking threads at
/// once; the pool decides how many calls run concurrently.
pub trait Detector: Send + Sync {
    /// Detect objects with at least `confidence_threshold` confidence.
    fn detect(&self, image: &RgbImage, confidence_threshold: f64) -> MediaResult<Vec<Detection>>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Placeholder backend used when no model is configured.
///
/// Every call fails with [`MediaError::ModelNotFound`], so cameras run on
/// motion alone.
#[derive(Debug, Clone, Default)]
pub struct DisabledDetector {
    reason: String,
}

impl DisabledDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Detector for DisabledDetector {
    fn detect(&self, _image: &RgbImage, _confidence_threshold: f64) -> MediaResult<Vec<Detection>> {
        Err(MediaError::model_not_found(self.reason.clone()))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Bounded-concurrency front for a shared [`Detector`].
#[derive(Clone)]
pub struct DetectorPool {
    detector: Arc<dyn Detector>,
    permits: Arc<Semaphore>,
}

impl DetectorPool {
    /// Create a pool allowing `max_concurrent` simultaneous inferences.
    pub fn new(detector: Arc<dyn Detector>, max_concurrent: usize) -> Self {
        Self {
            detector,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Run the detector on the blocking pool.
    ///
    /// Backend errors and panics are logged and yield an empty list. The
    /// result only contains allow-listed classes at or above the threshold.
    pub async fn detect(&self, frame: &Frame, confidence_threshold: f64) -> Vec<Detection> {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Vec::new();
        };

        let detector = Arc::clone(&self.detector);
        let image = Arc::clone(&frame.image);
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect(&image, confidence_threshold)
        })
        .await;

        match result {
            Ok(Ok(detections)) => filter_detections(detections, confidence_threshold),
            Ok(Err(MediaError::ModelNotFound(reason))) => {
                debug!(detector = self.detector.name(), reason = %reason, "Detector unavailable");
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!(
                    detector = self.detector.name(),
                    frame = frame.index,
                    error = %e,
                    "Object detection failed, treating frame as empty"
                );
                record_failure(self.detector.name(), "error");
                Vec::new()
            }
            Err(e) => {
                warn!(
                    detector = self.detector.name(),
                    frame = frame.index,
                    error = %e,
                    "Object detection task panicked, treating frame as empty"
                );
                record_failure(self.detector.name(), "panic");
                Vec::new()
            }
        }
    }
}

/// Fixed set of exclusive backend handles, handed out round-robin.
///
/// Inference sessions need `&mut` access to run, so one session serializes
/// every caller. Holding one per permit of the [`DetectorPool`] lets that many
/// inferences run at once.
pub struct SessionPool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> SessionPool<T> {
    pub fn new(items: Vec<T>) -> MediaResult<Self> {
        if items.is_empty() {
            return Err(MediaError::internal("session pool needs at least one session"));
        }
        Ok(Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        })
    }

    /// Build `count` handles with `make`, stopping at the first failure.
    pub fn build(count: usize, make: impl FnMut() -> MediaResult<T>) -> MediaResult<Self> {
        let items = std::iter::repeat_with(make)
            .take(count.max(1))
            .collect::<MediaResult<Vec<T>>>()?;
        Self::new(items)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Take the first free handle starting from a rotating offset, or wait
    /// for the one at the offset when all are busy.
    pub fn acquire(&self) -> MediaResult<MutexGuard<'_, T>> {
        let len = self.slots.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            match self.slots[(start + offset) % len].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => continue,
            }
        }

        self.slots[start]
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))
    }
}

fn record_failure(detector: &'static str, kind: &'static str) {
    metrics::counter!("vigil_detector_failures_total", "detector" => detector, "kind" => kind)
        .increment(1);
}

/// Keep allow-listed detections at or above the confidence threshold.
pub fn filter_detections(detections: Vec<Detection>, confidence_threshold: f64) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.is_relevant() && d.confidence >= confidence_threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedDetector(Vec<Detection>);

    impl Detector for FixedDetector {
        fn detect(&self, _image: &RgbImage, _threshold: f64) -> MediaResult<Vec<Detection>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _image: &RgbImage, _threshold: f64) -> MediaResult<Vec<Detection>> {
            Err(MediaError::detection_failed("boom"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&self, _image: &RgbImage, _threshold: f64) -> MediaResult<Vec<Detection>> {
            panic!("backend crashed")
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct SlowDetector {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Detector for SlowDetector {
        fn detect(&self, _image: &RgbImage, _threshold: f64) -> MediaResult<Vec<Detection>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn frame() -> Frame {
        Frame::new(1, RgbImage::new(8, 8))
    }

    fn det(class: &str, confidence: f64) -> Detection {
        Detection::new(class, BoundingBox::new(0.0, 0.0, 10.0, 10.0), confidence)
    }

    #[test]
    fn test_detection_geometry() {
        let d = Detection::new("person", BoundingBox::new(10.0, 20.0, 50.0, 100.0), 0.9);
        assert_eq!(d.center(), Point::new(35.0, 70.0));
        assert!((d.area() - 5000.0).abs() < 1e-9);
        assert!(d.is_relevant());
        assert!(!det("dog", 0.9).is_relevant());
    }

    #[tokio::test]
    async fn test_pool_filters_classes_and_threshold() {
        let pool = DetectorPool::new(
            Arc::new(FixedDetector(vec![
                det("person", 0.9),
                det("dog", 0.95),
                det("car", 0.3),
                det("truck", 0.5),
            ])),
            2,
        );

        let found = pool.detect(&frame(), 0.5).await;
        let classes: Vec<_> = found.iter().map(|d| d.class.as_str()).collect();
        assert_eq!(classes, vec!["person", "truck"]);
    }

    #[tokio::test]
    async fn test_pool_degrades_errors_and_panics_to_empty() {
        let failing = DetectorPool::new(Arc::new(FailingDetector), 1);
        assert!(failing.detect(&frame(), 0.5).await.is_empty());

        let panicking = DetectorPool::new(Arc::new(PanickingDetector), 1);
        assert!(panicking.detect(&frame(), 0.5).await.is_empty());
        // Permit is released after a panic
        assert!(panicking.detect(&frame(), 0.5).await.is_empty());

        let disabled = DetectorPool::new(Arc::new(DisabledDetector::new("no model")), 1);
        assert_eq!(disabled.detector_name(), "disabled");
        assert!(disabled.detect(&frame(), 0.5).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_concurrency() {
        let detector = Arc::new(SlowDetector {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = DetectorPool::new(detector.clone(), 2);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.detect(&frame(), 0.5).await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(detector.peak.load(Ordering::SeqCst) <= 2);
        assert!(detector.peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_session_pool_hands_out_distinct_sessions() {
        let pool = SessionPool::new(vec![0u32, 1, 2]).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();

        let mut held = vec![*a, *b, *c];
        held.sort_unstable();
        assert_eq!(held, vec![0, 1, 2]);
    }

    #[test]
    fn test_session_pool_runs_in_parallel() {
        let pool = SessionPool::build(3, || Ok(0u32)).unwrap();
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    let mut session = pool.acquire().unwrap();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    *session += 1;
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let total: u32 = (0..pool.len()).map(|_| *pool.acquire().unwrap()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_session_pool_build_errors() {
        assert!(SessionPool::<u32>::new(Vec::new()).is_err());

        let mut made = 0;
        let result = SessionPool::build(3, || {
            made += 1;
            if made == 2 {
                Err(MediaError::model_not_found("broken.onnx"))
            } else {
                Ok(made)
            }
        });
        assert!(result.is_err());
        assert_eq!(made, 2);
    }
}
