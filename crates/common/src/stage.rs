//! Stage identifiers and the records each stage persists

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::PipelineError;

/// Derivation stages that produce cacheable artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Detection,
    Actions,
    Captions,
}

impl StageKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Actions => "actions",
            Self::Captions => "captions",
        }
    }

    /// Name of the persisted artifact document
    #[must_use]
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::Detection => "detections.json",
            Self::Actions => "actions.json",
            Self::Captions => "captions.json",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detection" | "detections" => Ok(Self::Detection),
            "action" | "actions" => Ok(Self::Actions),
            "caption" | "captions" | "captioning" => Ok(Self::Captions),
            other => Err(PipelineError::InvalidRequest(format!(
                "unknown stage '{other}'"
            ))),
        }
    }
}

/// Accept a confidence only when it lies in [0, 1]
#[must_use]
pub fn checked_confidence(value: f32) -> Option<f32> {
    (0.0..=1.0).contains(&value).then_some(value)
}

/// A detected object in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source-frame pixel coordinates
    pub bbox: [f32; 4],
}

/// All detections for a single frame
pub type FrameDetections = Vec<Detection>;

/// Raw output of an action recognizer for one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPrediction {
    pub label: String,
    pub confidence: f32,
}

/// Recognized action for the clip starting at `start_seconds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub start_seconds: u32,
    pub label: String,
    pub confidence: f32,
}

/// Caption generated for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub frame_index: u32,
    pub caption: String,
}

/// One unit of a stage result, keyed by frame or time-window identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry<R> {
    pub key: String,
    pub value: R,
}

/// Complete, persisted result of one stage run
///
/// Written in one operation after every unit has been attempted, so a stored
/// artifact is never partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact<R> {
    pub video_id: String,
    pub stage: StageKind,
    /// blake3 fingerprint of the parameters the artifact was computed with
    pub params_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub units_planned: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    /// Units the stage declined to process (e.g. short tail clips)
    pub units_skipped: usize,
    pub entries: Vec<StageEntry<R>>,
}

impl<R> StageArtifact<R> {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&R> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }
}
