//! Object detection using a YOLOv8 ONNX model.
//!
//! Provides the production [`Detector`] backend with GPU acceleration support:
//! - CUDA on Linux with NVIDIA GPU (`cuda` feature)
//! - CoreML on macOS with Apple Silicon
//! - CPU fallback on all platforms

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};
use vigil_models::BoundingBox;

use crate::detector::{Detection, Detector, SessionPool};
use crate::error::{MediaError, MediaResult};

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Configuration for the YOLO backend.
#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Sessions to load; inference runs on at most this many frames at once
    pub sessions: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            nms_threshold: 0.45,
            input_size: 640,
            sessions: 1,
        }
    }
}

/// Object detector using a YOLOv8 ONNX model.
pub struct YoloDetector {
    sessions: SessionPool<Session>,
    config: YoloConfig,
}

impl YoloDetector {
    /// Load the model.
    ///
    /// Returns error if model file doesn't exist or cannot be loaded.
    pub fn new(config: YoloConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let sessions = SessionPool::build(config.sessions, || create_session(model_path))?;
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            sessions = sessions.len(),
            "Object detector initialized"
        );

        Ok(Self { sessions, config })
    }

    /// Resize to the model input, normalize to [0, 1], NCHW layout.
    fn preprocess(&self, image: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for pixel in resized.pixels() {
                chw_data.push(pixel[c] as f32 / 255.0);
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self.sessions.acquire()?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // YOLOv8 output is [1, 84, 8400]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::internal("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::internal(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Decode `[1, 84, 8400]` output into pixel-space detections.
    ///
    /// 84 = 4 (cx, cy, w, h) + 80 class scores.
    fn postprocess(
        &self,
        outputs: &[f32],
        orig_width: u32,
        orig_height: u32,
        confidence_threshold: f32,
    ) -> MediaResult<Vec<Detection>> {
        let num_classes = COCO_CLASSES.len();
        let num_boxes = 8400;
        let num_features = 4 + num_classes;

        if outputs.len() != num_features * num_boxes {
            return Err(MediaError::internal(format!(
                "Unexpected output size: expected {}, got {}",
                num_features * num_boxes,
                outputs.len()
            )));
        }

        let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
            .map_err(|e| MediaError::internal(format!("Failed to reshape output: {}", e)))?;
        let transposed = output_array.t();

        let input_size = self.config.input_size as f32;
        let scale_w = orig_width as f32 / input_size;
        let scale_h = orig_height as f32 / input_size;
        let (max_x, max_y) = (orig_width as f32, orig_height as f32);

        let mut candidates = Vec::new();
        for i in 0..num_boxes {
            let mut best_class = 0;
            let mut best_score = 0.0f32;
            for c in 0..num_classes {
                let score = transposed[[i, 4 + c]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < confidence_threshold {
                continue;
            }

            let cx = transposed[[i, 0]] * scale_w;
            let cy = transposed[[i, 1]] * scale_h;
            let w = transposed[[i, 2]] * scale_w;
            let h = transposed[[i, 3]] * scale_h;

            let x1 = (cx - w / 2.0).clamp(0.0, max_x);
            let y1 = (cy - h / 2.0).clamp(0.0, max_y);
            let x2 = (cx + w / 2.0).clamp(0.0, max_x);
            let y2 = (cy + h / 2.0).clamp(0.0, max_y);

            candidates.push(Detection::new(
                COCO_CLASSES[best_class],
                BoundingBox::from_corners(x1 as f64, y1 as f64, x2 as f64, y2 as f64),
                best_score as f64,
            ));
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold as f64))
    }

    pub fn config(&self) -> &YoloConfig {
        &self.config
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage, confidence_threshold: f64) -> MediaResult<Vec<Detection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let input = self.preprocess(image)?;
        let outputs = self.run_inference(input)?;
        let detections = self.postprocess(&outputs, width, height, confidence_threshold as f32)?;

        debug!(count = detections.len(), "Object detection completed");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "yolov8"
    }
}

/// Remove overlapping same-class detections, keeping the most confident.
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class == candidate.class && k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}
