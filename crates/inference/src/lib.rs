//! External model capabilities
//!
//! The pipeline talks to four models through narrow async contracts:
//!
//! | capability | input | output |
//! |---|---|---|
//! | [`Detector`] | one frame | labelled boxes in frame pixels |
//! | [`ActionRecognizer`] | fixed-length clip | one label with confidence |
//! | [`Captioner`] | one frame | text |
//! | [`ChatCompleter`] | full message history | text |
//!
//! Implementations are stateless from the caller's point of view and shared
//! read-only behind `Arc`. Concrete backends:
//! - [`yolo::YoloDetector`]: `YOLOv8` exported to ONNX
//! - [`videomae::VideoMaeRecognizer`]: VideoMAE-style clip classifier in ONNX
//! - [`openai::OpenAiCaptioner`] / [`openai::OpenAiChat`]: OpenAI-compatible HTTP endpoints
//! - [`mock`]: counting test doubles

pub mod config;
pub mod mock;
pub mod openai;
pub mod policy;
pub mod videomae;
pub mod yolo;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use video_grounding_common::{ActionPrediction, Detection};

pub use config::{InferenceConfig, OpenAiEndpoint};
pub use policy::CallPolicy;

/// Failure of a single capability call
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("inference error: {0}")]
    Inference(String),
}

impl CapabilityError {
    /// Transient failures worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Object detection over a single frame
#[async_trait]
pub trait Detector: Send + Sync {
    /// Identifies the model; part of the detection cache key
    fn model_id(&self) -> &str;

    /// Boxes are `[x1, y1, x2, y2]` in the pixel space of `frame`
    async fn detect(&self, frame: &RgbImage) -> CapabilityResult<Vec<Detection>>;
}

/// Action classification over a clip of equally sized frames
#[async_trait]
pub trait ActionRecognizer: Send + Sync {
    fn model_id(&self) -> &str;

    async fn recognize(&self, clip: &[RgbImage]) -> CapabilityResult<ActionPrediction>;
}

/// Natural-language description of a frame
#[async_trait]
pub trait Captioner: Send + Sync {
    fn model_id(&self) -> &str;

    async fn caption(&self, frame: &RgbImage) -> CapabilityResult<String>;
}

/// Stateless chat completion: every call carries the whole history
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, history: &[ChatMessage]) -> CapabilityResult<String>;
}

/// Stand-in for a capability with no backend configured; every call fails
#[derive(Debug, Clone)]
pub struct Unconfigured {
    what: &'static str,
}

impl Unconfigured {
    #[must_use]
    pub fn new(what: &'static str) -> Self {
        Self { what }
    }

    fn fail<T>(&self) -> CapabilityResult<T> {
        Err(CapabilityError::Unavailable(format!(
            "no {} backend configured",
            self.what
        )))
    }
}

#[async_trait]
impl Detector for Unconfigured {
    fn model_id(&self) -> &str {
        "unconfigured"
    }

    async fn detect(&self, _frame: &RgbImage) -> CapabilityResult<Vec<Detection>> {
        self.fail()
    }
}

#[async_trait]
impl ActionRecognizer for Unconfigured {
    fn model_id(&self) -> &str {
        "unconfigured"
    }

    async fn recognize(&self, _clip: &[RgbImage]) -> CapabilityResult<ActionPrediction> {
        self.fail()
    }
}

#[async_trait]
impl Captioner for Unconfigured {
    fn model_id(&self) -> &str {
        "unconfigured"
    }

    async fn caption(&self, _frame: &RgbImage) -> CapabilityResult<String> {
        self.fail()
    }
}

#[async_trait]
impl ChatCompleter for Unconfigured {
    async fn complete(&self, _history: &[ChatMessage]) -> CapabilityResult<String> {
        self.fail()
    }
}

/// The four capabilities the orchestrator is built with
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn Detector>,
    pub action_recognizer: Arc<dyn ActionRecognizer>,
    pub captioner: Arc<dyn Captioner>,
    pub chat: Arc<dyn ChatCompleter>,
}

impl Capabilities {
    /// Load every backend named in `config`
    ///
    /// Missing ONNX models leave the capability unconfigured (its calls fail
    /// and stages record the units as failed); a model that exists but cannot
    /// be loaded is an error.
    pub fn from_config(config: &InferenceConfig) -> CapabilityResult<Self> {
        let detector: Arc<dyn Detector> = match &config.detector_model {
            Some(path) => Arc::new(yolo::YoloDetector::new(path, yolo::YoloConfig::default())?),
            None => {
                warn!("DETECTOR_MODEL not set, object detection is unavailable");
                Arc::new(Unconfigured::new("detector"))
            }
        };

        let action_recognizer: Arc<dyn ActionRecognizer> = match &config.action_model {
            Some(path) => Arc::new(videomae::VideoMaeRecognizer::new(
                path,
                config.action_labels.as_deref(),
                videomae::VideoMaeConfig::default(),
            )?),
            None => {
                warn!("ACTION_MODEL not set, action recognition is unavailable");
                Arc::new(Unconfigured::new("action recognizer"))
            }
        };

        let captioner = Arc::new(openai::OpenAiCaptioner::new(
            config.caption.clone(),
            config.request_timeout,
        )?);
        let chat = Arc::new(openai::OpenAiChat::new(
            config.chat.clone(),
            config.request_timeout,
        )?);

        info!(
            "Capabilities ready: detector={}, actions={}, captioner={}, chat={}",
            detector.model_id(),
            action_recognizer.model_id(),
            config.caption.model,
            config.chat.model
        );

        Ok(Self {
            detector,
            action_recognizer,
            captioner,
            chat,
        })
    }
}
