/// Common types and utilities for the video grounding pipeline
use thiserror::Error;

pub mod model;
pub mod stage;

pub use model::{FrameRef, FrameSet, VideoAsset, VideoFormat, FRAME_FILE_PREFIX};
pub use stage::{
    checked_confidence, ActionPrediction, ActionRecord, CaptionRecord, Detection, FrameDetections,
    StageArtifact, StageEntry, StageKind,
};

/// Pipeline errors
///
/// The first seven variants are the client-facing taxonomy; the rest are
/// infrastructure faults that surface as internal errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Rejected format: {0} (allowed: .mp4, .avi, .mov)")]
    RejectedFormat(String),

    #[error("Duration exceeds limit: {duration:.2}s (max: {max}s)")]
    DurationExceeded { duration: f64, max: f64 },

    #[error("Unreadable video: {0}")]
    UnreadableVideo(String),

    #[error("Captions not ready for video {0}")]
    CaptionsNotReady(String),

    #[error("Stage {stage} timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("Chat unavailable: {0}")]
    ChatUnavailable(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Internal(format!("image: {err}"))
    }
}

impl PipelineError {
    /// Stable machine-readable name of the error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RejectedFormat(_) => "rejected_format",
            Self::DurationExceeded { .. } => "duration_exceeded",
            Self::UnreadableVideo(_) => "unreadable_video",
            Self::CaptionsNotReady(_) => "captions_not_ready",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::ChatUnavailable(_) => "chat_unavailable",
            Self::ArtifactNotFound(_) => "artifact_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error was caused by the request rather than the service
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::RejectedFormat(_)
                | Self::DurationExceeded { .. }
                | Self::UnreadableVideo(_)
                | Self::InvalidRequest(_)
                | Self::ArtifactNotFound(_)
                | Self::CaptionsNotReady(_)
        )
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
