//! Frame sources backed by the FFmpeg CLI.
//!
//! A camera is opened by trying a short list of input variants (RTSP over TCP,
//! then UDP, then FFmpeg's default; platform capture formats for local
//! devices). Each variant is probed with `ffprobe` for its resolution, then an
//! `ffmpeg` process decodes to raw RGB24 on stdout, one frame per
//! `width * height * 3` bytes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};
use vigil_models::{FrameSize, SourceLocator};

use crate::error::{MediaError, MediaResult};
use crate::frame::rgb24_len;

/// Default bound on a single frame read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on probing one input variant.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// An open stream of frames from one camera.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next frame.
    async fn read_frame(&mut self) -> MediaResult<RgbImage>;

    /// Resolution of the frames produced.
    fn frame_size(&self) -> FrameSize;

    /// Backend variant that was opened, for logging.
    fn backend(&self) -> &str;

    /// Release the underlying resources.
    async fn close(&mut self);
}

/// Opens frame sources for camera locators.
#[async_trait]
pub trait FrameSourceFactory: Send + Sync {
    /// Open `locator`, trying backend variants in order.
    ///
    /// Fails with [`MediaError::SourceUnavailable`] when every variant fails.
    async fn open(&self, locator: &SourceLocator, target_fps: f64) -> MediaResult<Box<dyn FrameSource>>;
}

/// One way of handing a locator to FFmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputVariant {
    pub label: &'static str,
    /// Input options (before the input)
    pub options: Vec<String>,
    pub input: String,
}

impl InputVariant {
    fn new(label: &'static str, options: &[&str], input: impl Into<String>) -> Self {
        Self {
            label,
            options: options.iter().map(|s| s.to_string()).collect(),
            input: input.into(),
        }
    }
}

/// Input variants to try for a locator, in order.
pub fn input_variants(locator: &SourceLocator) -> Vec<InputVariant> {
    match locator {
        SourceLocator::Device(index) => device_variants(*index),
        SourceLocator::Url(url) if locator.is_rtsp() => vec![
            InputVariant::new("rtsp-tcp", &["-rtsp_transport", "tcp"], url.clone()),
            InputVariant::new("rtsp-udp", &["-rtsp_transport", "udp"], url.clone()),
            InputVariant::new("default", &[], url.clone()),
        ],
        SourceLocator::Url(url) => vec![InputVariant::new("default", &[], url.clone())],
    }
}

#[cfg(target_os = "linux")]
fn device_variants(index: u32) -> Vec<InputVariant> {
    let path = format!("/dev/video{}", index);
    vec![
        InputVariant::new("v4l2", &["-f", "v4l2"], path.clone()),
        InputVariant::new("default", &[], path),
    ]
}

#[cfg(target_os = "macos")]
fn device_variants(index: u32) -> Vec<InputVariant> {
    vec![
        InputVariant::new("avfoundation", &["-f", "avfoundation", "-framerate", "30"], index.to_string()),
        InputVariant::new("avfoundation-default-rate", &["-f", "avfoundation"], index.to_string()),
    ]
}

#[cfg(target_os = "windows")]
fn device_variants(index: u32) -> Vec<InputVariant> {
    vec![InputVariant::new("vfwcap", &["-f", "vfwcap"], index.to_string())]
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn device_variants(index: u32) -> Vec<InputVariant> {
    vec![InputVariant::new("default", &[], index.to_string())]
}

/// Builder for the capture and probe command lines of one variant.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    variant: InputVariant,
    fps: Option<f64>,
    log_level: String,
}

impl CaptureCommand {
    pub fn new(variant: InputVariant) -> Self {
        Self {
            variant,
            fps: None,
            log_level: "error".to_string(),
        }
    }

    /// Decimate the decoded stream to roughly `fps` frames per second.
    pub fn fps(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            self.fps = Some(fps);
        }
        self
    }

    /// Arguments for `ffmpeg` decoding to RGB24 on stdout.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
        ];
        args.extend(self.variant.options.iter().cloned());
        args.push("-i".to_string());
        args.push(self.variant.input.clone());
        args.push("-an".to_string());
        if let Some(fps) = self.fps {
            args.push("-vf".to_string());
            args.push(format!("fps={:.3}", fps));
        }
        args.extend(
            ["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
                .iter()
                .map(|s| s.to_string()),
        );
        args
    }

    /// Arguments for `ffprobe` reporting the first video stream's size.
    pub fn ffprobe_args(&self) -> Vec<String> {
        let mut args = vec!["-v".to_string(), "error".to_string()];
        args.extend(self.variant.options.iter().cloned());
        args.extend(
            [
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-print_format",
                "json",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.variant.input.clone());
        args
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract the frame size from `ffprobe` JSON output.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<FrameSize> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    probe
        .streams
        .iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(FrameSize::new(w, h)),
            _ => None,
        })
        .ok_or_else(|| MediaError::FfprobeFailed {
            message: "no video stream with dimensions".to_string(),
            stderr: None,
        })
}

/// Opens cameras through `ffprobe` + `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegSourceFactory {
    read_timeout: Duration,
    probe_timeout: Duration,
}

impl Default for FfmpegSourceFactory {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT, DEFAULT_PROBE_TIMEOUT)
    }
}

impl FfmpegSourceFactory {
    pub fn new(read_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            read_timeout,
            probe_timeout,
        }
    }

    async fn probe(&self, command: &CaptureCommand) -> MediaResult<FrameSize> {
        let output = Command::new("ffprobe")
            .args(command.ffprobe_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.probe_timeout, output)
            .await
            .map_err(|_| MediaError::Timeout(self.probe_timeout.as_millis() as u64))??;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: "FFprobe failed".to_string(),
                stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        parse_probe_output(&output.stdout)
    }

    async fn open_variant(
        &self,
        variant: &InputVariant,
        target_fps: f64,
    ) -> MediaResult<FfmpegFrameSource> {
        let command = CaptureCommand::new(variant.clone()).fps(target_fps);
        let size = self.probe(&command).await?;

        let mut child = Command::new("ffmpeg")
            .args(command.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stdout not captured"))?;

        let mut source = FfmpegFrameSource {
            child,
            frames: RawFrameReader::new(stdout, size, self.read_timeout),
            backend: variant.label,
            pending: None,
        };

        // A variant only counts as open once it has produced a frame
        match source.frames.read_frame().await {
            Ok(first) => {
                source.pending = Some(first);
                Ok(source)
            }
            Err(e) => {
                source.close().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl FrameSourceFactory for FfmpegSourceFactory {
    async fn open(&self, locator: &SourceLocator, target_fps: f64) -> MediaResult<Box<dyn FrameSource>> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

        let variants = input_variants(locator);
        for variant in &variants {
            debug!(source = %locator, backend = variant.label, "Trying frame source backend");
            match self.open_variant(variant, target_fps).await {
                Ok(source) => {
                    info!(
                        source = %locator,
                        backend = variant.label,
                        width = source.frame_size().width,
                        height = source.frame_size().height,
                        "Frame source opened"
                    );
                    return Ok(Box::new(source));
                }
                Err(e) => {
                    warn!(source = %locator, backend = variant.label, error = %e, "Frame source backend failed");
                }
            }
        }

        Err(MediaError::source_unavailable(locator.redacted(), variants.len()))
    }
}

/// Reassembles fixed-size RGB24 frames from a byte stream.
///
/// A read that times out keeps the bytes it already received, so the next
/// call finishes the same frame and the stream stays aligned.
pub struct RawFrameReader<R> {
    reader: R,
    size: FrameSize,
    buf: Vec<u8>,
    filled: usize,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> RawFrameReader<R> {
    pub fn new(reader: R, size: FrameSize, read_timeout: Duration) -> Self {
        Self {
            reader,
            size,
            buf: vec![0u8; rgb24_len(size.width, size.height)],
            filled: 0,
            read_timeout,
        }
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Bytes of the next frame received so far.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    /// Read until one whole frame is buffered or the read timeout passes.
    pub async fn read_frame(&mut self) -> MediaResult<RgbImage> {
        let deadline = tokio::time::Instant::now() + self.read_timeout;
        while self.filled < self.buf.len() {
            // `read` is cancel-safe, `read_exact` is not
            let read = tokio::time::timeout_at(deadline, self.reader.read(&mut self.buf[self.filled..])).await;
            match read {
                Err(_) => return Err(MediaError::Timeout(self.read_timeout.as_millis() as u64)),
                Ok(Ok(0)) => return Err(MediaError::read_failed("stream ended")),
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        let len = self.buf.len();
        let data = std::mem::replace(&mut self.buf, vec![0u8; len]);
        self.filled = 0;
        RgbImage::from_raw(self.size.width, self.size.height, data)
            .ok_or_else(|| MediaError::InvalidFrame("short RGB24 buffer".into()))
    }
}

/// Raw RGB24 frames read from an `ffmpeg` child process.
pub struct FfmpegFrameSource {
    child: Child,
    frames: RawFrameReader<ChildStdout>,
    backend: &'static str,
    /// Frame read while confirming the connection.
    pending: Option<RgbImage>,
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn read_frame(&mut self) -> MediaResult<RgbImage> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.frames.read_frame().await
    }

    fn frame_size(&self) -> FrameSize {
        self.frames.size()
    }

    fn backend(&self) -> &str {
        self.backend
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "ffmpeg already exited");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.child.wait())
            .await
            .is_err()
        {
            warn!(backend = self.backend, "ffmpeg did not exit after kill");
        }
    }
}
