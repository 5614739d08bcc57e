//! Shared data models for the Vigil intrusion detection core.
//!
//! This crate provides Serde-serializable types for:
//! - Pixel geometry (points, boxes, frame sizes)
//! - Camera configuration and frame-source locators
//! - Detection rules (crossing lines, polygon zones) and their ingestion
//! - Intrusion events emitted to external sinks

pub mod camera;
pub mod error;
pub mod event;
pub mod geometry;
pub mod rules;

// Re-export common types
pub use camera::{sensitivity_to_confidence, CameraConfig, CameraId, SourceLocator};
pub use error::{ModelError, ModelResult};
pub use event::{FrameRef, IntrusionEvent};
pub use geometry::{BoundingBox, FrameSize, Point};
pub use rules::{DetectionLine, DetectionZone, RuleConfig, RuleKind, MIN_ZONE_VERTICES};
