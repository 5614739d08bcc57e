//! Adaptive background model for motion estimation.
//!
//! Each camera keeps a per-pixel running Gaussian (mean and variance) over a
//! downscaled grayscale copy of its frames. Pixels deviating from the model by
//! more than `k` standard deviations are foreground; the largest 4-connected
//! foreground blob decides whether the frame has significant motion.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use vigil_models::{FrameSize, Point};

/// Tuning for [`MotionEstimator`].
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Width of the grid the model runs on (height keeps the aspect ratio).
    pub processing_width: u32,
    /// Background learning rate (alpha).
    pub learning_rate: f32,
    /// Foreground if |pixel - mean| > k * sigma.
    pub deviation_threshold: f32,
    /// Variance assigned to freshly seeded pixels.
    pub initial_variance: f32,
    /// Floor that keeps sigma from collapsing on static scenes.
    pub min_variance: f32,
    /// Minimum blob area in full-frame pixels.
    pub min_blob_area: f64,
    /// Minimum blob area as a fraction of the frame area.
    pub min_area_fraction: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            processing_width: 160,
            learning_rate: 0.05,
            deviation_threshold: 2.5,
            initial_variance: 225.0,
            min_variance: 16.0,
            min_blob_area: 500.0,
            min_area_fraction: 0.001,
        }
    }
}

/// Outcome of one [`MotionEstimator::estimate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionResult {
    /// True when the largest blob is significant.
    pub motion: bool,
    /// Centroid of the largest blob in frame coordinates, set when `motion`.
    pub centroid: Option<Point>,
    /// Area of the largest blob in full-frame pixels.
    pub blob_area: f64,
}

impl MotionResult {
    pub(crate) fn none() -> Self {
        Self::default()
    }
}

/// A per-camera background model.
///
/// The first frame, and the first frame after a resolution change, only seed
/// the model and never report motion.
pub trait MotionModel: Send {
    /// Update the model with `image` and report the largest moving region.
    fn estimate(&mut self, image: &RgbImage) -> MotionResult;

    /// Forget the background; the next frame seeds a new one.
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// The best motion model this build supports.
///
/// MOG2 when built with `opencv` and it initializes, the running-Gaussian
/// [`MotionEstimator`] otherwise.
pub fn default_motion_model(config: MotionConfig) -> Box<dyn MotionModel> {
    #[cfg(feature = "opencv")]
    {
        match crate::motion_mog2::Mog2MotionEstimator::new(config.clone()) {
            Ok(model) => return Box::new(model),
            Err(e) => tracing::warn!(error = %e, "MOG2 unavailable, using running-Gaussian motion model"),
        }
    }
    Box::new(MotionEstimator::new(config))
}

struct BackgroundModel {
    source: FrameSize,
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

/// Per-camera motion estimator.
pub struct MotionEstimator {
    config: MotionConfig,
    model: Option<BackgroundModel>,
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl MotionEstimator {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    /// Drop the background model; the next frame seeds a new one.
    pub fn reset(&mut self) {
        self.model = None;
    }

    /// True once a frame has seeded the model.
    pub fn is_seeded(&self) -> bool {
        self.model.is_some()
    }

    /// Update the model with `image` and report the largest moving blob.
    ///
    /// The first frame, and the first frame after a resolution change, only
    /// seed the model and never report motion.
    pub fn estimate(&mut self, image: &RgbImage) -> MotionResult {
        let source = FrameSize::new(image.width(), image.height());
        if source.width == 0 || source.height == 0 {
            return MotionResult::none();
        }

        let gray = self.downscale(image);
        let (width, height) = gray.dimensions();

        if self.model.as_ref().map_or(true, |m| m.source != source) {
            self.model = Some(seed_model(&gray, source, self.config.initial_variance));
            return MotionResult::none();
        }
        let Some(model) = self.model.as_mut() else {
            return MotionResult::none();
        };

        let alpha = self.config.learning_rate;
        let k_sq = self.config.deviation_threshold * self.config.deviation_threshold;
        let mut foreground = vec![false; (width * height) as usize];

        for (i, pixel) in gray.as_raw().iter().enumerate() {
            let value = *pixel as f32;
            let diff = value - model.mean[i];
            let diff_sq = diff * diff;
            foreground[i] = diff_sq > k_sq * model.variance[i];

            model.mean[i] += alpha * diff;
            model.variance[i] =
                (model.variance[i] + alpha * (diff_sq - model.variance[i])).max(self.config.min_variance);
        }

        let Some(blob) = largest_blob(&foreground, model.width, model.height) else {
            return MotionResult::none();
        };

        let scale_x = source.width as f64 / model.width as f64;
        let scale_y = source.height as f64 / model.height as f64;
        let blob_area = blob.count as f64 * scale_x * scale_y;
        let min_area = self
            .config
            .min_blob_area
            .max(source.area() * self.config.min_area_fraction);

        if blob_area <= min_area {
            return MotionResult {
                motion: false,
                centroid: None,
                blob_area,
            };
        }

        let count = blob.count as f64;
        let centroid = Point::new(
            (blob.sum_x / count + 0.5) * scale_x,
            (blob.sum_y / count + 0.5) * scale_y,
        );

        MotionResult {
            motion: true,
            centroid: Some(centroid),
            blob_area,
        }
    }

    fn downscale(&self, image: &RgbImage) -> GrayImage {
        downscale_gray(image, self.config.processing_width)
    }
}

impl MotionModel for MotionEstimator {
    fn estimate(&mut self, image: &RgbImage) -> MotionResult {
        MotionEstimator::estimate(self, image)
    }

    fn reset(&mut self) {
        MotionEstimator::reset(self)
    }

    fn name(&self) -> &'static str {
        "running-gaussian"
    }
}

/// Grayscale copy at most `processing_width` wide, aspect ratio kept.
pub(crate) fn downscale_gray(image: &RgbImage, processing_width: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let target_w = processing_width.clamp(1, w.max(1));
    if target_w == w {
        return imageops::grayscale(image);
    }
    let target_h = ((h as f64 * target_w as f64 / w as f64).round() as u32).max(1);
    let small = imageops::resize(image, target_w, target_h, FilterType::Triangle);
    imageops::grayscale(&small)
}

fn seed_model(gray: &GrayImage, source: FrameSize, initial_variance: f32) -> BackgroundModel {
    let (width, height) = gray.dimensions();
    BackgroundModel {
        source,
        width,
        height,
        mean: gray.as_raw().iter().map(|&p| p as f32).collect(),
        variance: vec![initial_variance; (width * height) as usize],
    }
}

struct Blob {
    count: usize,
    sum_x: f64,
    sum_y: f64,
}

/// Largest 4-connected component of the foreground mask.
fn largest_blob(mask: &[bool], width: u32, height: u32) -> Option<Blob> {
    let (w, h) = (width as usize, height as usize);
    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut best: Option<Blob> = None;

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        let mut blob = Blob {
            count: 0,
            sum_x: 0.0,
            sum_y: 0.0,
        };
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            blob.count += 1;
            blob.sum_x += x as f64;
            blob.sum_y += y as f64;

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        if best.as_ref().map_or(true, |b| blob.count > b.count) {
            best = Some(blob);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([20, 20, 20]))
    }

    fn with_square(width: u32, height: u32, x: u32, y: u32, size: u32) -> RgbImage {
        let mut img = blank(width, height);
        for py in y..(y + size).min(height) {
            for px in x..(x + size).min(width) {
                img.put_pixel(px, py, Rgb([240, 240, 240]));
            }
        }
        img
    }

    #[test]
    fn test_default_model_reports_motion() {
        let mut model = default_motion_model(MotionConfig::default());
        assert!(!model.estimate(&blank(320, 240)).motion);
        assert!(!model.estimate(&blank(320, 240)).motion);

        let result = model.estimate(&with_square(320, 240, 100, 50, 100));
        assert!(result.motion, "{} missed a bright square", model.name());
        let centroid = result.centroid.unwrap();
        assert!((centroid.x - 150.0).abs() < 10.0);
        assert!((centroid.y - 100.0).abs() < 10.0);

        model.reset();
        assert!(!model.estimate(&with_square(320, 240, 100, 50, 100)).motion);
    }

    #[test]
    fn test_first_frame_only_seeds() {
        let mut estimator = MotionEstimator::default();
        assert!(!estimator.is_seeded());
        let result = estimator.estimate(&with_square(320, 240, 100, 50, 100));
        assert!(!result.motion);
        assert!(estimator.is_seeded());
    }

    #[test]
    fn test_static_scene_has_no_motion() {
        let mut estimator = MotionEstimator::default();
        for _ in 0..5 {
            assert!(!estimator.estimate(&blank(320, 240)).motion);
        }
    }

    #[test]
    fn test_moving_object_reports_centroid() {
        let mut estimator = MotionEstimator::default();
        estimator.estimate(&blank(320, 240));
        estimator.estimate(&blank(320, 240));

        let result = estimator.estimate(&with_square(320, 240, 100, 50, 100));
        assert!(result.motion);
        let centroid = result.centroid.unwrap();
        assert!((centroid.x - 150.0).abs() < 4.0, "x = {}", centroid.x);
        assert!((centroid.y - 100.0).abs() < 4.0, "y = {}", centroid.y);
        assert!(result.blob_area > 8000.0);
    }

    #[test]
    fn test_small_blob_is_not_significant() {
        let mut estimator = MotionEstimator::default();
        estimator.estimate(&blank(320, 240));
        let result = estimator.estimate(&with_square(320, 240, 10, 10, 10));
        assert!(!result.motion);
        assert!(result.centroid.is_none());
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut estimator = MotionEstimator::default();
        estimator.estimate(&blank(320, 240));
        let result = estimator.estimate(&with_square(640, 480, 100, 100, 200));
        assert!(!result.motion);

        let again = estimator.estimate(&with_square(640, 480, 100, 100, 200));
        assert!(!again.motion);
    }

    #[test]
    fn test_reset_clears_model() {
        let mut estimator = MotionEstimator::default();
        estimator.estimate(&blank(320, 240));
        estimator.reset();
        assert!(!estimator.is_seeded());
        assert!(!estimator.estimate(&with_square(320, 240, 100, 50, 100)).motion);
    }

    #[test]
    fn test_largest_blob_picks_biggest_component() {
        #[rustfmt::skip]
        let mask = vec![
            true,  false, false, false,
            false, false, true,  true,
            false, false, true,  true,
        ];
        let blob = largest_blob(&mask, 4, 3).unwrap();
        assert_eq!(blob.count, 4);
        assert!((blob.sum_x / 4.0 - 2.5).abs() < 1e-9);
        assert!((blob.sum_y / 4.0 - 1.5).abs() < 1e-9);
        assert!(largest_blob(&[false; 4], 2, 2).is_none());
    }
}
