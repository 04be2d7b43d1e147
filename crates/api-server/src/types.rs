//! API request and response types

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query of `POST /api/v1/videos/{id}/frames`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FramesQuery {
    /// Seconds between sampled frames; the configured rate when absent
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub video_id: String,
    /// Whether a conversation existed
    pub reset: bool,
}
