//! Per-camera intrusion monitoring runtime.
//!
//! This crate provides:
//! - [`CameraMonitor`]: one capture and decision worker per camera
//! - [`MonitorRegistry`]: start, stop and query monitors by camera id
//! - Detection and notification cooldowns
//! - Event sinks for intrusion events
//! - Camera-scoped logging and Prometheus metrics

pub mod config;
pub mod cooldown;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod sink;

pub use config::{load_cameras, MonitorConfig};
pub use cooldown::CooldownGate;
pub use error::{MonitorError, MonitorResult};
pub use logging::CameraLogger;
pub use monitor::{CameraMonitor, MonitorContext, MonitorState, MonitorStatus};
pub use registry::MonitorRegistry;
pub use sink::{ChannelEventSink, EventSink, LogEventSink};
