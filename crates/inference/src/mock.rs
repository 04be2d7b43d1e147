//! Counting test doubles for every capability
//!
//! Each mock counts its calls and can be told to fail specific calls (by
//! zero-based call index) or to respond slowly. Injected failures are
//! [`CapabilityError::Inference`], which [`CallPolicy`](crate::CallPolicy)
//! does not retry, so call counts stay predictable.

use crate::{
    ActionRecognizer, CapabilityError, CapabilityResult, Captioner, ChatCompleter, ChatMessage,
    Detector, Role,
};
use async_trait::async_trait;
use image::RgbImage;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use video_grounding_common::{ActionPrediction, Detection};

/// Call counting, failure injection and latency shared by the mocks
#[derive(Debug, Default)]
struct Script {
    calls: AtomicUsize,
    failures: HashSet<usize>,
    latency: Duration,
}

impl Script {
    /// Record a call; sleeps for the latency and fails scripted indices
    async fn next(&self, what: &str) -> CapabilityResult<usize> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failures.contains(&index) {
            return Err(CapabilityError::Inference(format!(
                "scripted {what} failure on call {index}"
            )));
        }
        Ok(index)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

macro_rules! scripted {
    ($mock:ty) => {
        impl $mock {
            /// Fail the calls with these zero-based indices
            #[must_use]
            pub fn with_failures(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
                self.script.failures = calls.into_iter().collect();
                self
            }

            /// Sleep this long inside every call
            #[must_use]
            pub fn with_latency(mut self, latency: Duration) -> Self {
                self.script.latency = latency;
                self
            }

            /// Number of calls made so far
            pub fn calls(&self) -> usize {
                self.script.calls()
            }
        }
    };
}

/// Returns the same detections for every frame
#[derive(Debug)]
pub struct MockDetector {
    model_id: String,
    detections: Vec<Detection>,
    script: Script,
}

impl MockDetector {
    #[must_use]
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            model_id: "mock-detector".to_string(),
            detections,
            script: Script::default(),
        }
    }

    /// A single full-frame "person" at the given confidence
    #[must_use]
    pub fn person(confidence: f32) -> Self {
        Self::new(vec![Detection {
            label: "person".to_string(),
            confidence,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }])
    }
}

scripted!(MockDetector);

#[async_trait]
impl Detector for MockDetector {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn detect(&self, frame: &RgbImage) -> CapabilityResult<Vec<Detection>> {
        self.script.next("detection").await?;
        let (width, height) = frame.dimensions();
        // Scale the unit boxes to the frame
        Ok(self
            .detections
            .iter()
            .map(|d| Detection {
                bbox: [
                    d.bbox[0] * width as f32,
                    d.bbox[1] * height as f32,
                    d.bbox[2] * width as f32,
                    d.bbox[3] * height as f32,
                ],
                ..d.clone()
            })
            .collect())
    }
}

/// Labels every clip with the same action
#[derive(Debug)]
pub struct MockActionRecognizer {
    prediction: ActionPrediction,
    script: Script,
}

impl MockActionRecognizer {
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            prediction: ActionPrediction {
                label: label.into(),
                confidence,
            },
            script: Script::default(),
        }
    }
}

impl Default for MockActionRecognizer {
    fn default() -> Self {
        Self::new("walking", 0.8)
    }
}

scripted!(MockActionRecognizer);

#[async_trait]
impl ActionRecognizer for MockActionRecognizer {
    fn model_id(&self) -> &str {
        "mock-actions"
    }

    async fn recognize(&self, clip: &[RgbImage]) -> CapabilityResult<ActionPrediction> {
        self.script.next("action").await?;
        if clip.is_empty() {
            return Err(CapabilityError::InvalidInput("empty clip".to_string()));
        }
        Ok(self.prediction.clone())
    }
}

/// Describes a frame by its size and top-left pixel
#[derive(Debug, Default)]
pub struct MockCaptioner {
    script: Script,
}

impl MockCaptioner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

scripted!(MockCaptioner);

#[async_trait]
impl Captioner for MockCaptioner {
    fn model_id(&self) -> &str {
        "mock-captioner"
    }

    async fn caption(&self, frame: &RgbImage) -> CapabilityResult<String> {
        self.script.next("caption").await?;
        let (width, height) = frame.dimensions();
        let [r, g, b] = frame.get_pixel_checked(0, 0).map_or([0; 3], |p| p.0);
        Ok(format!("a {width}x{height} frame starting with rgb({r}, {g}, {b})"))
    }
}

/// Echoes the latest user message and keeps every history it was sent
#[derive(Debug, Default)]
pub struct MockChat {
    script: Script,
    failing: AtomicBool,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail as unavailable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Histories received so far, oldest first
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The reply produced for a given user message
    #[must_use]
    pub fn reply_for(message: &str) -> String {
        format!("reply to: {message}")
    }
}

scripted!(MockChat);

#[async_trait]
impl ChatCompleter for MockChat {
    async fn complete(&self, history: &[ChatMessage]) -> CapabilityResult<String> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history.to_vec());
        self.script.next("chat").await?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("chat backend is down".to_string()));
        }

        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| CapabilityError::InvalidInput("no user message".to_string()))?;
        Ok(Self::reply_for(&last_user.text))
    }
}
