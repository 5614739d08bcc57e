//! Event sinks receiving intrusion events.
//!
//! Persistence, broadcasting and alert delivery live behind [`EventSink`];
//! the monitor only hands events over. Emission runs on its own task so a
//! slow or failing sink never stalls frame capture.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};
use vigil_models::IntrusionEvent;
use vigil_vision::Frame;

use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

/// Destination for intrusion events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Take ownership of an event and the frame that triggered it.
    async fn emit(&self, event: IntrusionEvent, frame: Frame) -> MonitorResult<()>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Hand an event to `sink` on a separate task.
///
/// Failures are logged and counted.
pub fn dispatch(sink: Arc<dyn EventSink>, event: IntrusionEvent, frame: Frame) {
    let span = tracing::info_span!("emit", camera_id = %event.camera_id, event_id = %event.id);
    tokio::spawn(
        async move {
            let event_id = event.id;
            if let Err(e) = sink.emit(event, frame).await {
                warn!(sink = sink.name(), %event_id, error = %e, "Failed to emit intrusion event");
                metrics::record_sink_failure(sink.name());
            }
        }
        .instrument(span),
    );
}

/// Writes events to the log as structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn emit(&self, event: IntrusionEvent, _frame: Frame) -> MonitorResult<()> {
        let payload = serde_json::to_string(&event).map_err(|e| MonitorError::sink_failed(e.to_string()))?;
        info!(
            camera_id = %event.camera_id,
            rule_kind = %event.rule_kind,
            confidence = event.confidence,
            notify = event.notify,
            event = %payload,
            "{}", event.summary()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Forwards events to an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<(IntrusionEvent, Frame)>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(IntrusionEvent, Frame)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: IntrusionEvent, frame: Frame) -> MonitorResult<()> {
        self.tx
            .send((event, frame))
            .await
            .map_err(|_| MonitorError::sink_failed("event channel closed"))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Duration;
    use vigil_models::{CameraId, FrameRef, RuleKind};

    fn sample() -> (IntrusionEvent, Frame) {
        let frame = Frame::new(7, RgbImage::new(4, 4));
        let event = IntrusionEvent::new(CameraId::new("cam"), RuleKind::Basic, 0.9, frame.frame_ref());
        (event, frame)
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelEventSink::new(4);
        let (event, frame) = sample();
        dispatch(Arc::new(sink), event.clone(), frame);

        let (received, frame) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, event.id);
        assert_eq!(
            received.frame_ref,
            FrameRef {
                frame_index: 7,
                width: 4,
                height: 4
            }
        );
        assert_eq!(frame.index, 7);
    }

    #[tokio::test]
    async fn test_closed_channel_reports_failure() {
        let (sink, rx) = ChannelEventSink::new(1);
        drop(rx);
        let (event, frame) = sample();
        assert!(matches!(sink.emit(event, frame).await, Err(MonitorError::SinkFailed(_))));
    }

    #[tokio::test]
    async fn test_log_sink_accepts_events() {
        let (event, frame) = sample();
        LogEventSink.emit(event, frame).await.unwrap();
    }
}
