//! Frame capture and the per-frame intrusion pipeline.
//!
//! This crate provides:
//! - FFmpeg-backed frame sources with backend fallback
//! - Line and zone geometry
//! - The [`Detector`] capability and a bounded [`DetectorPool`]
//! - Adaptive background motion estimation (MOG2 with the `opencv` feature)
//! - Centroid object tracking
//! - The intrusion decision precedence

pub mod decision;
pub mod detector;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod motion;
#[cfg(feature = "opencv")]
pub mod motion_mog2;
#[cfg(feature = "onnx")]
pub mod object_detector;
pub mod source;
pub mod tracker;

pub use decision::{decide, Decision, DecisionEngine, DecisionInput, BASIC_MIN_AREA, BASIC_MIN_CONFIDENCE};
pub use detector::{Detection, Detector, DetectorPool, DisabledDetector, SessionPool, RELEVANT_CLASSES};
pub use error::{MediaError, MediaResult};
pub use frame::Frame;
pub use geometry::{crosses_line, point_in_any_zone, point_in_polygon, point_to_segment_distance, LINE_CROSSING_THRESHOLD};
pub use motion::{default_motion_model, MotionConfig, MotionEstimator, MotionModel, MotionResult};
#[cfg(feature = "opencv")]
pub use motion_mog2::Mog2MotionEstimator;
#[cfg(feature = "onnx")]
pub use object_detector::{YoloConfig, YoloDetector};
pub use source::{FfmpegSourceFactory, FrameSource, FrameSourceFactory};
pub use tracker::{TrackedObject, Tracker};
