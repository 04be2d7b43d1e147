//! Clip-level action recognition with a VideoMAE-style ONNX classifier
//!
//! The model takes `[1, T, 3, H, W]` ImageNet-normalized frames and returns
//! `[1, classes]` logits.

use crate::{ActionRecognizer, CapabilityError, CapabilityResult};
use async_trait::async_trait;
use image::RgbImage;
use ndarray::Array5;
use ort::{session::Session, value::TensorRef};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use video_grounding_common::{checked_confidence, ActionPrediction};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMaeConfig {
    /// Frames per clip
    pub clip_length: usize,
    /// Square frame edge
    pub size: u32,
}

impl Default for VideoMaeConfig {
    fn default() -> Self {
        Self {
            clip_length: 16,
            size: 224,
        }
    }
}

pub struct VideoMaeRecognizer {
    session: Arc<Mutex<Session>>,
    labels: Vec<String>,
    config: VideoMaeConfig,
    model_id: String,
}

impl VideoMaeRecognizer {
    /// Load the model, and class names from `labels` (one per line) if given
    pub fn new(
        model_path: impl AsRef<Path>,
        labels: Option<&Path>,
        config: VideoMaeConfig,
    ) -> CapabilityResult<Self> {
        let model_path = model_path.as_ref();
        info!("Loading action model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| CapabilityError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| CapabilityError::ModelLoad(e.to_string()))?;

        let labels = match labels {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CapabilityError::ModelLoad(format!("failed to read labels {path:?}: {e}"))
                })?;
                parse_labels(&text)
            }
            None => {
                warn!("No action labels configured, predictions use class indices");
                Vec::new()
            }
        };

        let model_id = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("videomae")
            .to_string();

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels,
            config,
            model_id,
        })
    }

    fn label(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{class}"))
    }
}

fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Normalize a clip into `[1, T, 3, H, W]`
fn preprocess(clip: &[RgbImage], config: &VideoMaeConfig) -> CapabilityResult<Array5<f32>> {
    if clip.len() != config.clip_length {
        return Err(CapabilityError::InvalidInput(format!(
            "clip has {} frames, model expects {}",
            clip.len(),
            config.clip_length
        )));
    }

    let size = config.size as usize;
    let mut input = Array5::zeros((1, config.clip_length, 3, size, size));
    for (t, frame) in clip.iter().enumerate() {
        if frame.dimensions() != (config.size, config.size) {
            return Err(CapabilityError::InvalidInput(format!(
                "frame {t} is {:?}, model expects {}x{}",
                frame.dimensions(),
                config.size,
                config.size
            )));
        }
        for (x, y, pixel) in frame.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                input[[0, t, c, y, x]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
    }
    Ok(input)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and probability of the most likely class
fn top_class(logits: &[f32]) -> Option<(usize, f32)> {
    softmax(logits)
        .into_iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[async_trait]
impl ActionRecognizer for VideoMaeRecognizer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn recognize(&self, clip: &[RgbImage]) -> CapabilityResult<ActionPrediction> {
        let input = preprocess(clip, &self.config)?;
        let session = self.session.clone();

        let logits = tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            let tensor = TensorRef::from_array_view(input.view())
                .map_err(|e| CapabilityError::Inference(e.to_string()))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| CapabilityError::Inference(e.to_string()))?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| CapabilityError::InvalidOutput(e.to_string()))?;
            Ok::<_, CapabilityError>(data.to_vec())
        })
        .await
        .map_err(|e| CapabilityError::Inference(format!("action task failed: {e}")))??;

        let (class, probability) = top_class(&logits)
            .ok_or_else(|| CapabilityError::InvalidOutput("empty logits".to_string()))?;
        let confidence = checked_confidence(probability).ok_or_else(|| {
            CapabilityError::InvalidOutput(format!("probability {probability} out of range"))
        })?;

        let label = self.label(class);
        debug!("Clip classified as {} ({:.3})", label, confidence);
        Ok(ActionPrediction { label, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_top_class() {
        let (class, p) = top_class(&[0.1, 4.0, -2.0]).unwrap();
        assert_eq!(class, 1);
        assert!(p > 0.9);
        assert!(top_class(&[]).is_none());
    }

    #[test]
    fn test_parse_labels_skips_blank_lines() {
        let labels = parse_labels("abseiling\n\n  air drumming \nanswering questions\n");
        assert_eq!(labels, vec!["abseiling", "air drumming", "answering questions"]);
    }

    #[test]
    fn test_preprocess_rejects_wrong_clip_length() {
        let config = VideoMaeConfig {
            clip_length: 4,
            size: 8,
        };
        let clip = vec![RgbImage::new(8, 8); 3];
        assert!(matches!(
            preprocess(&clip, &config),
            Err(CapabilityError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_preprocess_rejects_wrong_frame_size() {
        let config = VideoMaeConfig {
            clip_length: 2,
            size: 8,
        };
        let clip = vec![RgbImage::new(8, 8), RgbImage::new(16, 8)];
        assert!(matches!(
            preprocess(&clip, &config),
            Err(CapabilityError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_preprocess_normalizes() {
        let config = VideoMaeConfig {
            clip_length: 2,
            size: 4,
        };
        let clip = vec![RgbImage::from_pixel(4, 4, image::Rgb([255, 255, 255])); 2];
        let input = preprocess(&clip, &config).unwrap();
        assert_eq!(input.shape(), &[1, 2, 3, 4, 4]);
        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((input[[0, 1, 0, 3, 3]] - expected).abs() < 1e-5);
    }
}
