//! `YOLOv8` object detection via ONNX Runtime
//!
//! Frames are resized (no letterbox) to the model's square input, boxes come
//! back in input space and are rescaled to the source frame's pixel space.
//! Non-maximum suppression runs per class.

use crate::{CapabilityError, CapabilityResult, Detector};
use async_trait::async_trait;
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use video_grounding_common::{checked_confidence, Detection};

/// Detector settings independent of the caller's confidence threshold
#[derive(Debug, Clone, PartialEq)]
pub struct YoloConfig {
    /// Square model input edge (640 for stock `YOLOv8` exports)
    pub input_size: u32,
    /// Candidates below this score are dropped before NMS
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.1,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// `YOLOv8` detector backed by a shared ONNX session
pub struct YoloDetector {
    session: Arc<Mutex<Session>>,
    config: YoloConfig,
    model_id: String,
}

impl YoloDetector {
    pub fn new(model_path: impl AsRef<Path>, config: YoloConfig) -> CapabilityResult<Self> {
        let model_path = model_path.as_ref();
        info!("Loading YOLOv8 model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| CapabilityError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| CapabilityError::ModelLoad(e.to_string()))?;

        let model_id = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("yolov8")
            .to_string();

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            config,
            model_id,
        })
    }
}

/// CHW float tensor in [0, 1]
fn preprocess(frame: &RgbImage, input_size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(
        frame,
        input_size,
        input_size,
        image::imageops::FilterType::Triangle,
    );
    let size = input_size as usize;
    let mut input = Array4::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            input[[0, c, y, x]] = f32::from(pixel[c]) / 255.0;
        }
    }
    input
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = w * h;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Per-class non-maximum suppression, highest confidence first
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = keep
            .iter()
            .any(|k| k.label == candidate.label && iou(&k.bbox, &candidate.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Decode a `[1, 4 + classes, anchors]` output into source-pixel detections
fn postprocess(
    dims: &[i64],
    data: &[f32],
    source: (u32, u32),
    config: &YoloConfig,
) -> CapabilityResult<Vec<Detection>> {
    if dims.len() != 3 || dims[1] <= 4 {
        return Err(CapabilityError::InvalidOutput(format!(
            "expected [1, 4+classes, anchors] output, got {dims:?}"
        )));
    }
    let features = dims[1] as usize;
    let anchors = dims[2] as usize;
    if data.len() < features * anchors {
        return Err(CapabilityError::InvalidOutput(format!(
            "output has {} values, shape {dims:?}",
            data.len()
        )));
    }

    let scale_x = source.0 as f32 / config.input_size as f32;
    let scale_y = source.1 as f32 / config.input_size as f32;
    let (max_x, max_y) = (source.0 as f32, source.1 as f32);

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let feature = |f: usize| data[f * anchors + anchor];

        let (class_id, score) = (0..features - 4)
            .map(|c| (c, feature(4 + c)))
            .fold((0, f32::MIN), |best, next| if next.1 > best.1 { next } else { best });

        let Some(confidence) = checked_confidence(score) else {
            continue;
        };
        if confidence < config.min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (feature(0), feature(1), feature(2), feature(3));
        let bbox = [
            ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
        ];

        candidates.push(Detection {
            label: coco_class_name(class_id).to_string(),
            confidence,
            bbox,
        });
    }

    debug!("Raw detections before NMS: {}", candidates.len());
    let mut detections = non_max_suppression(candidates, config.iou_threshold);
    detections.truncate(config.max_detections);
    Ok(detections)
}

#[async_trait]
impl Detector for YoloDetector {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn detect(&self, frame: &RgbImage) -> CapabilityResult<Vec<Detection>> {
        let input = preprocess(frame, self.config.input_size);
        let source = frame.dimensions();
        let session = self.session.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let tensor = TensorRef::from_array_view(input.view())
                .map_err(|e| CapabilityError::Inference(e.to_string()))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| CapabilityError::Inference(e.to_string()))?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| CapabilityError::InvalidOutput(e.to_string()))?;
            postprocess(&shape.to_vec(), data, source, &config)
        })
        .await
        .map_err(|e| CapabilityError::Inference(format!("detection task failed: {e}")))?
    }
}

/// COCO class name for a `YOLOv8` class index
#[must_use]
pub fn coco_class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

/// The 80 COCO classes in model output order
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];
