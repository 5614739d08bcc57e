//! Intrusion monitor binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil_monitor::{load_cameras, LogEventSink, MonitorConfig, MonitorContext, MonitorRegistry};
use vigil_vision::{Detector, DetectorPool, DisabledDetector, FfmpegSourceFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting vigil-monitor");

    let config = MonitorConfig::from_env();
    info!("Monitor config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        vigil_monitor::metrics::init_metrics(addr)?;
    }

    let cameras_file = config
        .cameras_file
        .clone()
        .context("VIGIL_CAMERAS_FILE is not set")?;
    let cameras = load_cameras(&cameras_file)?;
    info!(count = cameras.len(), file = %cameras_file, "Loaded camera definitions");

    let detector = build_detector(&config);
    let detectors = DetectorPool::new(detector, config.detector_parallelism);
    info!(detector = detectors.detector_name(), "Detector ready");

    let sources = Arc::new(FfmpegSourceFactory::new(config.read_timeout, config.probe_timeout));
    let ctx = MonitorContext::new(config, detectors, sources, Arc::new(LogEventSink));
    let registry = MonitorRegistry::new(ctx);

    let mut started = 0;
    for camera in cameras {
        if !camera.enabled {
            info!(camera_id = %camera.id, "Camera disabled, skipping");
            continue;
        }
        let camera_id = camera.id.clone();
        match registry.start(camera).await {
            Ok(_) => started += 1,
            Err(e) => error!(camera_id = %camera_id, error = %e, "Failed to start monitor"),
        }
    }

    if started == 0 {
        warn!("No camera monitors running");
    }

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    registry.stop_all().await;
    info!("Monitor shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vigil=info".parse()?)
        .add_directive("ort=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn build_detector(config: &MonitorConfig) -> Arc<dyn Detector> {
    use vigil_vision::{YoloConfig, YoloDetector};

    let Some(model_path) = config.model_path.clone() else {
        warn!("VIGIL_MODEL_PATH not set, running on motion only");
        return Arc::new(DisabledDetector::new("no model configured"));
    };

    // One session per detector permit
    match YoloDetector::new(YoloConfig {
        model_path,
        sessions: config.detector_parallelism,
        ..YoloConfig::default()
    }) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            warn!(error = %e, "Object detector unavailable, running on motion only");
            Arc::new(DisabledDetector::new(e.to_string()))
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_detector(config: &MonitorConfig) -> Arc<dyn Detector> {
    if config.model_path.is_some() {
        warn!("Built without the onnx feature, ignoring VIGIL_MODEL_PATH");
    }
    Arc::new(DisabledDetector::new("built without onnx support"))
}
