//! Prometheus metrics for camera monitors.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use vigil_models::RuleKind;

use crate::error::{MonitorError, MonitorResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: &str) -> MonitorResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| MonitorError::config_error(format!("invalid METRICS_ADDR '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MonitorError::config_error(format!("failed to install metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Capture metrics
    pub const FRAMES_TOTAL: &str = "vigil_frames_total";
    pub const READ_FAILURES_TOTAL: &str = "vigil_read_failures_total";
    pub const ACTIVE_MONITORS: &str = "vigil_active_monitors";

    // Pipeline metrics
    pub const PIPELINE_DURATION_SECONDS: &str = "vigil_pipeline_duration_seconds";
    pub const PIPELINE_SKIPPED_TOTAL: &str = "vigil_pipeline_skipped_total";
    pub const INTRUSIONS_TOTAL: &str = "vigil_intrusions_total";

    // Sink metrics
    pub const SINK_FAILURES_TOTAL: &str = "vigil_sink_failures_total";

    // Lifecycle metrics
    pub const MONITOR_STOPS_TOTAL: &str = "vigil_monitor_stops_total";
}

/// Record a successfully read frame.
pub fn record_frame(camera_id: &str) {
    counter!(names::FRAMES_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

/// Record a failed frame read.
pub fn record_read_failure(camera_id: &str) {
    counter!(names::READ_FAILURES_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

/// Record one evaluated pipeline run.
pub fn record_pipeline_run(camera_id: &str, duration_secs: f64) {
    histogram!(names::PIPELINE_DURATION_SECONDS, "camera" => camera_id.to_string())
        .record(duration_secs);
}

/// Record a sampled frame skipped by the detection cooldown.
pub fn record_pipeline_skipped(camera_id: &str) {
    counter!(names::PIPELINE_SKIPPED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

/// Record an intrusion event.
pub fn record_intrusion(camera_id: &str, kind: RuleKind, notify: bool) {
    let labels = [
        ("camera", camera_id.to_string()),
        ("kind", kind.as_str().to_string()),
        ("notify", notify.to_string()),
    ];
    counter!(names::INTRUSIONS_TOTAL, &labels).increment(1);
}

/// Record a failed event emission.
pub fn record_sink_failure(sink: &'static str) {
    counter!(names::SINK_FAILURES_TOTAL, "sink" => sink).increment(1);
}

/// Record a monitor stopping, with how it stopped.
pub fn record_monitor_stop(reason: &'static str) {
    counter!(names::MONITOR_STOPS_TOTAL, "reason" => reason).increment(1);
}

pub fn monitor_started() {
    gauge!(names::ACTIVE_MONITORS).increment(1.0);
}

pub fn monitor_exited() {
    gauge!(names::ACTIVE_MONITORS).decrement(1.0);
}
