//! OpenCV MOG2 background subtraction.
//!
//! Frames are grayscaled and downscaled with `image`, copied into a `Mat` and
//! fed to a MOG2 subtractor without shadow detection. The largest external
//! contour of the thresholded foreground mask is the moving region.

use image::RgbImage;
use opencv::{
    core::{Mat, Point as CvPoint, Ptr, Scalar, Vector, CV_8UC1},
    imgproc,
    prelude::*,
    video::{self, BackgroundSubtractorMOG2},
};
use vigil_models::{FrameSize, Point};

use crate::error::{MediaError, MediaResult};
use crate::motion::{downscale_gray, MotionConfig, MotionModel, MotionResult};

/// Frames of history the subtractor keeps.
const HISTORY: i32 = 500;
/// Squared Mahalanobis distance for a pixel to count as foreground.
const VAR_THRESHOLD: f64 = 16.0;
/// Mask values above this are confident foreground.
const MASK_THRESHOLD: f64 = 200.0;

/// MOG2-backed motion model, one per camera.
pub struct Mog2MotionEstimator {
    config: MotionConfig,
    subtractor: Ptr<BackgroundSubtractorMOG2>,
    /// Resolution the subtractor was seeded with.
    source: Option<FrameSize>,
}

impl Mog2MotionEstimator {
    pub fn new(config: MotionConfig) -> MediaResult<Self> {
        Ok(Self {
            config,
            subtractor: new_subtractor()?,
            source: None,
        })
    }

    fn apply(&mut self, image: &RgbImage, source: FrameSize) -> MediaResult<MotionResult> {
        let gray = downscale_gray(image, self.config.processing_width);
        let (width, height) = gray.dimensions();

        let mut input = Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC1, Scalar::all(0.0))
            .map_err(cv_error("mat"))?;
        input
            .data_bytes_mut()
            .map_err(cv_error("mat data"))?
            .copy_from_slice(gray.as_raw());

        let seeding = self.source != Some(source);
        if seeding {
            self.subtractor = new_subtractor()?;
            self.source = Some(source);
        }

        let learning_rate = if seeding { 1.0 } else { -1.0 };
        let mut mask = Mat::default();
        self.subtractor
            .apply(&input, &mut mask, learning_rate)
            .map_err(cv_error("mog2 apply"))?;
        if seeding {
            return Ok(MotionResult::none());
        }

        let mut binary = Mat::default();
        imgproc::threshold(&mask, &mut binary, MASK_THRESHOLD, 255.0, imgproc::THRESH_BINARY)
            .map_err(cv_error("threshold"))?;

        let mut contours: Vector<Vector<CvPoint>> = Vector::new();
        imgproc::find_contours(
            &binary,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            CvPoint::new(0, 0),
        )
        .map_err(cv_error("find contours"))?;

        let mut largest: Option<(f64, Vector<CvPoint>)> = None;
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false).map_err(cv_error("contour area"))?;
            if largest.as_ref().map_or(true, |(best, _)| area > *best) {
                largest = Some((area, contour));
            }
        }
        let Some((area, contour)) = largest else {
            return Ok(MotionResult::none());
        };

        let scale_x = source.width as f64 / width as f64;
        let scale_y = source.height as f64 / height as f64;
        let blob_area = area * scale_x * scale_y;
        let min_area = self
            .config
            .min_blob_area
            .max(source.area() * self.config.min_area_fraction);
        if blob_area <= min_area {
            return Ok(MotionResult {
                motion: false,
                centroid: None,
                blob_area,
            });
        }

        let moments = imgproc::moments(&contour, false).map_err(cv_error("moments"))?;
        let (cx, cy) = if moments.m00 > 0.0 {
            (moments.m10 / moments.m00, moments.m01 / moments.m00)
        } else {
            let rect = imgproc::bounding_rect(&contour).map_err(cv_error("bounding rect"))?;
            (
                rect.x as f64 + rect.width as f64 / 2.0,
                rect.y as f64 + rect.height as f64 / 2.0,
            )
        };

        Ok(MotionResult {
            motion: true,
            centroid: Some(Point::new((cx + 0.5) * scale_x, (cy + 0.5) * scale_y)),
            blob_area,
        })
    }
}

impl MotionModel for Mog2MotionEstimator {
    fn estimate(&mut self, image: &RgbImage) -> MotionResult {
        let source = FrameSize::new(image.width(), image.height());
        if source.width == 0 || source.height == 0 {
            return MotionResult::none();
        }
        match self.apply(image, source) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(error = %e, "MOG2 update failed, reseeding");
                self.source = None;
                MotionResult::none()
            }
        }
    }

    fn reset(&mut self) {
        self.source = None;
    }

    fn name(&self) -> &'static str {
        "mog2"
    }
}

fn new_subtractor() -> MediaResult<Ptr<BackgroundSubtractorMOG2>> {
    video::create_background_subtractor_mog2(HISTORY, VAR_THRESHOLD, false).map_err(cv_error("mog2 create"))
}

fn cv_error(stage: &'static str) -> impl Fn(opencv::Error) -> MediaError {
    move |e| MediaError::internal(format!("opencv {}: {}", stage, e))
}
