//! REST API for video grounding
//!
//! Uploads run admission, frame extraction, detection and action recognition;
//! captioning and chat are triggered separately. Every stage can be re-run
//! for an admitted video without uploading it again.

mod handlers;
mod types;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use video_grounding_orchestrator::Orchestrator;

pub use handlers::*;
pub use types::*;

/// Upload body limit when `MAX_UPLOAD_BYTES` is not set
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
}

impl ApiState {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Upload and eager pipeline
        .route("/api/v1/videos", post(upload_video))
        .route("/api/v1/videos/{video_id}", get(get_video))
        // Re-entry points
        .route("/api/v1/videos/{video_id}/frames", post(extract_frames))
        .route("/api/v1/videos/{video_id}/stages/{stage}", post(run_stage))
        .route("/api/v1/videos/{video_id}/caption", post(caption_video))
        // Conversation
        .route(
            "/api/v1/videos/{video_id}/chat",
            post(chat).get(chat_history).delete(reset_chat),
        )
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> Result<(), std::io::Error> {
    axum::serve(listener, build_router(state)).await
}

/// Start the API server
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}
