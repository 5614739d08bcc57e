use std::path::Path;
use std::process::Command;

use vigil_models::CameraConfig;
use vigil_monitor::{load_cameras, MonitorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    if std::env::args().any(|a| a == "--schema") {
        let schema = CameraConfig::json_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = MonitorConfig::from_env();

    println!("vigil-selfcheck: starting");
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;
    check_cameras(config.cameras_file.as_deref())?;
    check_model(config.model_path.as_deref())?;

    let motion = vigil_vision::default_motion_model(vigil_vision::MotionConfig::default());
    println!("vigil-selfcheck: motion model {}", motion.name());

    println!("vigil-selfcheck: ok");
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let output = Command::new(name)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", name, output.status));
    }
    Ok(())
}

fn check_cameras(path: Option<&str>) -> anyhow::Result<()> {
    let path = path.ok_or_else(|| anyhow::anyhow!("missing required env var VIGIL_CAMERAS_FILE"))?;
    let cameras = load_cameras(path)?;
    let enabled = cameras.iter().filter(|c| c.enabled).count();
    println!(
        "vigil-selfcheck: {} cameras ({} enabled) in {}",
        cameras.len(),
        enabled,
        path
    );
    for camera in &cameras {
        println!(
            "  {} source={} rule={} sensitivity={}",
            camera.id,
            camera.source.redacted(),
            camera.rules.active_rule(),
            camera.sensitivity
        );
    }
    Ok(())
}

fn check_model(path: Option<&str>) -> anyhow::Result<()> {
    match path {
        Some(path) if !Path::new(path).exists() => {
            Err(anyhow::anyhow!("model file not found: {}", path))
        }
        Some(path) => {
            let onnx = if cfg!(feature = "onnx") { "enabled" } else { "disabled" };
            println!("vigil-selfcheck: model {} (onnx support {})", path, onnx);
            Ok(())
        }
        None => {
            println!("vigil-selfcheck: no model configured, cameras run on motion only");
            Ok(())
        }
    }
}
