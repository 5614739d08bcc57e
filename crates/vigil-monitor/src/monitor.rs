//! Per-camera monitor: one tokio task reading frames and running the pipeline.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//! Starting opens the frame source and spawns the worker. The worker owns all
//! per-camera state (background model, tracker, cooldowns, frame counter) and
//! publishes a [`MonitorStatus`] snapshot through a watch channel. Stopping
//! signals the worker, waits a bounded time and aborts it if needed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};
use vigil_models::{CameraConfig, CameraId, IntrusionEvent};
use vigil_vision::{
    default_motion_model, DecisionEngine, DecisionInput, DetectorPool, Frame, FrameSource,
    FrameSourceFactory, MotionConfig, MotionModel,
};

use crate::config::MonitorConfig;
use crate::cooldown::CooldownGate;
use crate::error::{MonitorError, MonitorResult};
use crate::logging::CameraLogger;
use crate::metrics;
use crate::sink::{self, EventSink};

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Stopped => "stopped",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub camera_id: CameraId,
    pub state: MonitorState,
    pub running: bool,
    pub frame_count: u64,
    pub tracked_object_count: usize,
    pub events_emitted: u64,
    /// Backend variant the source was opened with.
    pub backend: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_detection_at: Option<DateTime<Utc>>,
    /// Why the monitor stopped on its own, if it did.
    pub last_error: Option<String>,
}

impl MonitorStatus {
    /// Status of a monitor whose source is being opened.
    pub(crate) fn starting(camera_id: CameraId) -> Self {
        let mut status = Self::new(camera_id);
        status.set_state(MonitorState::Starting);
        status
    }

    fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            state: MonitorState::Stopped,
            running: false,
            frame_count: 0,
            tracked_object_count: 0,
            events_emitted: 0,
            backend: None,
            started_at: None,
            last_detection_at: None,
            last_error: None,
        }
    }

    fn set_state(&mut self, state: MonitorState) {
        self.state = state;
        self.running = state == MonitorState::Running;
    }
}

/// Collaborators shared by every monitor in the process.
#[derive(Clone)]
pub struct MonitorContext {
    pub config: Arc<MonitorConfig>,
    pub detectors: DetectorPool,
    pub sources: Arc<dyn FrameSourceFactory>,
    pub sink: Arc<dyn EventSink>,
}

impl MonitorContext {
    pub fn new(
        config: MonitorConfig,
        detectors: DetectorPool,
        sources: Arc<dyn FrameSourceFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            detectors,
            sources,
            sink,
        }
    }
}

/// Handle to a running camera worker.
pub struct CameraMonitor {
    camera_id: CameraId,
    shutdown: watch::Sender<bool>,
    status: Arc<watch::Sender<MonitorStatus>>,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
    logger: CameraLogger,
}

impl CameraMonitor {
    /// Open the camera's frame source and spawn its worker.
    ///
    /// Fails with [`MonitorError::CameraDisabled`] for disabled cameras and
    /// [`MonitorError::SourceUnavailable`] when no backend variant opens.
    pub async fn start(camera: CameraConfig, ctx: MonitorContext) -> MonitorResult<Self> {
        let (status, _) = watch::channel(MonitorStatus::new(camera.id.clone()));
        Self::start_with_status(camera, ctx, Arc::new(status)).await
    }

    /// Like [`CameraMonitor::start`], publishing into an existing status channel.
    ///
    /// Lets callers observe `Starting` while the source is still opening.
    pub(crate) async fn start_with_status(
        camera: CameraConfig,
        ctx: MonitorContext,
        status: Arc<watch::Sender<MonitorStatus>>,
    ) -> MonitorResult<Self> {
        if !camera.enabled {
            return Err(MonitorError::CameraDisabled(camera.id));
        }

        let logger = CameraLogger::new(&camera);
        status.send_replace(MonitorStatus::starting(camera.id.clone()));

        let detail = format!(
            "rule={} sample_every={} fps={}",
            camera.rules.active_rule(),
            camera.sample_every_n_frames,
            camera.target_fps
        );
        logger.log_state(MonitorState::Starting, &detail);

        let source = match ctx.sources.open(&camera.source, camera.target_fps).await {
            Ok(source) => source,
            Err(e) => {
                status.send_modify(|s| {
                    s.set_state(MonitorState::Stopped);
                    s.last_error = Some(e.to_string());
                });
                logger.log_error(&format!("cannot open source: {}", e));
                return Err(MonitorError::source_unavailable(&camera.id, e));
            }
        };

        let backend = source.backend().to_string();
        status.send_modify(|s| {
            s.set_state(MonitorState::Running);
            s.backend = Some(backend.clone());
            s.started_at = Some(Utc::now());
        });
        let logger = logger.with_backend(backend.as_str());
        logger.log_state(MonitorState::Running, "source open");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let camera_id = camera.id.clone();
        let stop_timeout = ctx.config.stop_timeout;
        let span = logger.create_span();

        let worker = Worker::new(camera, ctx, source, shutdown_rx, Arc::clone(&status), logger.clone());
        metrics::monitor_started();
        let handle = tokio::spawn(worker.run().instrument(span));

        Ok(Self {
            camera_id,
            shutdown: shutdown_tx,
            status,
            handle: Some(handle),
            stop_timeout,
            logger,
        })
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Current status snapshot.
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status updates.
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    /// True while the worker is capturing.
    pub fn is_running(&self) -> bool {
        self.status.borrow().running
            && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the worker and wait for it to exit.
    ///
    /// Waits up to the configured stop timeout, then aborts the task. The
    /// frame source is released either way.
    pub async fn stop(mut self) -> MonitorStatus {
        let Some(mut handle) = self.handle.take() else {
            return self.status();
        };

        if !handle.is_finished() {
            self.status.send_modify(|s| s.set_state(MonitorState::Stopping));
            self.logger.log_state(MonitorState::Stopping, "stop requested");
        }
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.logger.log_error(&format!("worker task failed: {}", e));
            }
            Err(_) => {
                self.logger.log_warning(&format!(
                    "worker did not exit within {:?}, aborting",
                    self.stop_timeout
                ));
                handle.abort();
                let _ = handle.await;
                metrics::monitor_exited();
                metrics::record_monitor_stop("aborted");
                self.logger.log_state(MonitorState::Stopped, "worker aborted");
            }
        }

        self.status.send_modify(|s| s.set_state(MonitorState::Stopped));
        self.status()
    }
}

impl Drop for CameraMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(true);
            if !handle.is_finished() {
                debug!(camera_id = %self.camera_id, "Monitor dropped while running, aborting worker");
                handle.abort();
            }
        }
    }
}

enum LoopExit {
    Stopped,
    SourceLost(u32),
}

/// Per-camera state, owned by the worker task.
struct Worker {
    camera: CameraConfig,
    ctx: MonitorContext,
    source: Box<dyn FrameSource>,
    shutdown: watch::Receiver<bool>,
    status: Arc<watch::Sender<MonitorStatus>>,
    logger: CameraLogger,
    engine: DecisionEngine,
    motion: Box<dyn MotionModel>,
    cooldown: CooldownGate,
    confidence_threshold: f64,
    frame_count: u64,
    events_emitted: u64,
}

impl Worker {
    fn new(
        camera: CameraConfig,
        ctx: MonitorContext,
        source: Box<dyn FrameSource>,
        shutdown: watch::Receiver<bool>,
        status: Arc<watch::Sender<MonitorStatus>>,
        logger: CameraLogger,
    ) -> Self {
        let engine = DecisionEngine::new(camera.rules.clone());
        let cooldown = CooldownGate::new(
            ctx.config.detection_cooldown,
            ctx.config.notification_cooldown,
        );
        let confidence_threshold = camera.confidence_threshold();
        Self {
            camera,
            ctx,
            source,
            shutdown,
            status,
            logger,
            engine,
            motion: default_motion_model(MotionConfig::default()),
            cooldown,
            confidence_threshold,
            frame_count: 0,
            events_emitted: 0,
        }
    }

    async fn run(mut self) {
        let exit = self.capture_loop().await;
        self.source.close().await;
        metrics::monitor_exited();

        let detail = match exit {
            LoopExit::Stopped => {
                metrics::record_monitor_stop("requested");
                format!("after {} frames", self.frame_count)
            }
            LoopExit::SourceLost(failures) => {
                metrics::record_monitor_stop("source_lost");
                let err = MonitorError::SourceLost {
                    camera_id: self.camera.id.clone(),
                    failures,
                };
                self.logger.log_error(&err.to_string());
                self.status.send_modify(|s| s.last_error = Some(err.to_string()));
                format!("source lost after {} frames", self.frame_count)
            }
        };

        self.status.send_modify(|s| s.set_state(MonitorState::Stopped));
        self.logger.log_state(MonitorState::Stopped, &detail);
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.camera.target_fps.max(0.1))
    }

    async fn capture_loop(&mut self) -> LoopExit {
        let camera_id = self.camera.id.to_string();
        let frame_interval = self.frame_interval();
        let sample_every = u64::from(self.camera.sample_every_n_frames.max(1));
        let max_failures = self.ctx.config.max_read_failures.max(1);
        let mut failures: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                return LoopExit::Stopped;
            }
            let iteration_start = Instant::now();

            let read = tokio::select! {
                _ = self.shutdown.changed() => return LoopExit::Stopped,
                read = self.source.read_frame() => read,
            };

            match read {
                Err(e) => {
                    failures += 1;
                    metrics::record_read_failure(&camera_id);
                    if failures >= max_failures {
                        return LoopExit::SourceLost(failures);
                    }
                    if failures == 1 || failures % 10 == 0 {
                        warn!(
                            camera_id = %camera_id,
                            failures,
                            error = %e,
                            "Frame read failed"
                        );
                    }
                    if self.pause(self.ctx.config.read_failure_backoff).await {
                        return LoopExit::Stopped;
                    }
                    continue;
                }
                Ok(image) => {
                    failures = 0;
                    self.frame_count += 1;
                    metrics::record_frame(&camera_id);
                    let frame = Frame::new(self.frame_count, image);

                    if self.frame_count % sample_every == 0 {
                        self.process(frame).await;
                    }

                    let frame_count = self.frame_count;
                    let tracked = self.engine.tracked_object_count();
                    let events = self.events_emitted;
                    self.status.send_modify(|s| {
                        s.frame_count = frame_count;
                        s.tracked_object_count = tracked;
                        s.events_emitted = events;
                    });
                }
            }

            if let Some(rest) = frame_interval.checked_sub(iteration_start.elapsed()) {
                if self.pause(rest).await {
                    return LoopExit::Stopped;
                }
            }
        }
    }

    /// Sleep unless a stop arrives first. Returns true on stop.
    async fn pause(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return *self.shutdown.borrow();
        }
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Run motion, detection and the decision on one sampled frame.
    async fn process(&mut self, frame: Frame) {
        let camera_id = self.camera.id.as_str();
        let now = Instant::now();
        if !self.cooldown.detection_open(now) {
            metrics::record_pipeline_skipped(camera_id);
            return;
        }

        let started = Instant::now();
        let motion = self.motion.estimate(&frame.image);
        let run_detector = !self.ctx.config.motion_prefilter
            || motion.motion
            || self.engine.needs_detections_without_motion();

        let detections = if run_detector {
            self.ctx.detectors.detect(&frame, self.confidence_threshold).await
        } else {
            Vec::new()
        };

        let decision = self.engine.evaluate(&DecisionInput {
            detections: &detections,
            motion_centroid: motion.centroid,
            frame_size: frame.size(),
            now,
        });
        metrics::record_pipeline_run(camera_id, started.elapsed().as_secs_f64());

        let Some(kind) = decision.kind.filter(|_| decision.intrusion) else {
            return;
        };

        let notify = self.cooldown.record_detection(now);
        let event = IntrusionEvent::new(self.camera.id.clone(), kind, decision.confidence, frame.frame_ref())
            .with_zone(decision.zone)
            .with_object_count(decision.object_count)
            .with_notify(notify);

        debug!(
            camera_id = %self.camera.id,
            frame = frame.index,
            rule_kind = %kind,
            confidence = decision.confidence,
            notify,
            "Intrusion decided"
        );
        metrics::record_intrusion(camera_id, kind, notify);

        self.events_emitted += 1;
        let detected_at = event.timestamp;
        self.status.send_modify(|s| s.last_detection_at = Some(detected_at));
        sink::dispatch(Arc::clone(&self.ctx.sink), event, frame);
    }
}

/// In-memory frame sources and detectors for monitor and registry tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vigil_models::{BoundingBox, FrameSize, SourceLocator};
    use vigil_vision::{Detection, Detector, MediaError, MediaResult};

    /// How a scripted source behaves.
    #[derive(Clone, Copy)]
    pub enum SourceMode {
        /// Produce blank frames forever.
        Frames,
        /// Blank frames, except a bright square on the given 1-based read.
        MotionAt(u64),
        /// Every read fails.
        Failing,
        /// Reads never complete.
        Hanging,
    }

    pub struct ScriptedSource {
        mode: SourceMode,
        live: Arc<AtomicUsize>,
        reads: u64,
    }

    fn blank_frame() -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([30, 30, 30]))
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn read_frame(&mut self) -> MediaResult<RgbImage> {
            self.reads += 1;
            match self.mode {
                SourceMode::Frames => {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok(blank_frame())
                }
                SourceMode::MotionAt(read) => {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    let mut image = blank_frame();
                    if self.reads == read {
                        for y in 10..40 {
                            for x in 10..40 {
                                image.put_pixel(x, y, Rgb([240, 240, 240]));
                            }
                        }
                    }
                    Ok(image)
                }
                SourceMode::Failing => Err(MediaError::read_failed("scripted failure")),
                SourceMode::Hanging => {
                    std::future::pending::<()>().await;
                    Err(MediaError::read_failed("unreachable"))
                }
            }
        }

        fn frame_size(&self) -> FrameSize {
            FrameSize::new(64, 48)
        }

        fn backend(&self) -> &str {
            "scripted"
        }

        async fn close(&mut self) {}
    }

    /// Opens scripted sources and counts how many are alive.
    pub struct ScriptedFactory {
        pub mode: SourceMode,
        pub unavailable: bool,
        pub opens: AtomicUsize,
        pub live: Arc<AtomicUsize>,
        pub open_delay: Duration,
    }

    impl ScriptedFactory {
        pub fn new(mode: SourceMode) -> Self {
            Self {
                mode,
                unavailable: false,
                opens: AtomicUsize::new(0),
                live: Arc::new(AtomicUsize::new(0)),
                open_delay: Duration::ZERO,
            }
        }

        pub fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FrameSourceFactory for ScriptedFactory {
        async fn open(&self, locator: &SourceLocator, _fps: f64) -> MediaResult<Box<dyn FrameSource>> {
            if !self.open_delay.is_zero() {
                tokio::time::sleep(self.open_delay).await;
            }
            if self.unavailable {
                return Err(MediaError::source_unavailable(locator.redacted(), 2));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource {
                mode: self.mode,
                live: Arc::clone(&self.live),
                reads: 0,
            }))
        }
    }

    /// Returns the same detections on every call and counts calls.
    pub struct CountingDetector {
        pub detections: Vec<Detection>,
        pub calls: AtomicUsize,
        pub delay: Mutex<Duration>,
    }

    impl CountingDetector {
        pub fn new(detections: Vec<Detection>) -> Self {
            Self {
                detections,
                calls: AtomicUsize::new(0),
                delay: Mutex::new(Duration::ZERO),
            }
        }

        pub fn person(confidence: f64) -> Self {
            Self::new(vec![Detection::new(
                "person",
                BoundingBox::new(10.0, 10.0, 50.0, 100.0),
                confidence,
            )])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Detector for CountingDetector {
        fn detect(&self, _image: &RgbImage, _threshold: f64) -> MediaResult<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay.lock().map(|d| *d).unwrap_or_default();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            Ok(self.detections.clone())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    pub fn test_config() -> MonitorConfig {
        MonitorConfig {
            detection_cooldown: Duration::from_secs(3),
            notification_cooldown: Duration::from_secs(30),
            max_read_failures: 3,
            read_failure_backoff: Duration::from_millis(1),
            stop_timeout: Duration::from_secs(2),
            motion_prefilter: false,
            ..MonitorConfig::default()
        }
    }

    pub fn camera(id: &str) -> CameraConfig {
        CameraConfig::new(id, SourceLocator::Url(format!("rtsp://{}/live", id)))
            .with_sampling(1)
            .with_target_fps(200.0)
    }
}
