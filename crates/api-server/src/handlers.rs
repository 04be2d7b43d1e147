//! HTTP request handlers for API endpoints

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};
use video_grounding_common::{PipelineError, StageKind};

use crate::types::{ChatRequest, ChatResponse, FramesQuery, HealthResponse, ResetResponse};
use crate::ApiState;

/// Multipart field carrying the video
const UPLOAD_FIELD: &str = "file";

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Status code for a pipeline error
#[must_use]
pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::RejectedFormat(_)
        | PipelineError::DurationExceeded { .. }
        | PipelineError::UnreadableVideo(_)
        | PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::ArtifactNotFound(_) | PipelineError::CaptionsNotReady(_) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::StageTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::ChatUnavailable(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Storage(_)
        | PipelineError::Io(_)
        | PipelineError::Serialization(_)
        | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a pipeline error onto a plain-text response
fn reject(err: PipelineError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed ({}): {}", err.kind(), err);
    } else {
        warn!("Request rejected ({}): {}", err.kind(), err);
    }
    (status, err.to_string())
}

/// An upload whose body broke off while admission was streaming it
fn upload_failure(err: &PipelineError) -> Option<(StatusCode, String)> {
    let PipelineError::Io(io) = err else {
        return None;
    };
    let upload = io.get_ref()?.downcast_ref::<MultipartError>()?;
    warn!("Upload aborted: {}", upload);
    Some((upload.status(), format!("Failed to read upload: {upload}")))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Upload a video: admission, frame extraction, detection and actions
pub async fn upload_video(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("Upload is missing a file name"))?;
        info!("Upload received: {}", filename);

        // Admission streams the body to disk as it arrives
        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        tokio::pin!(reader);

        let report = state
            .orchestrator
            .ingest(&mut reader, &filename)
            .await
            .map_err(|err| upload_failure(&err).unwrap_or_else(|| reject(err)))?;
        return Ok(Json(report));
    }

    Err(bad_request(format!(
        "Multipart field '{UPLOAD_FIELD}' is required"
    )))
}

/// Stored metadata of a video
pub async fn get_video(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let asset = state.orchestrator.asset(&video_id).await.map_err(reject)?;
    Ok(Json(asset))
}

/// Re-extract frames, optionally at a different rate
pub async fn extract_frames(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
    Query(query): Query<FramesQuery>,
) -> ApiResult<impl IntoResponse> {
    let frame_set = state
        .orchestrator
        .extract_frames(&video_id, query.rate)
        .await
        .map_err(reject)?;
    Ok(Json(frame_set))
}

/// Run (or fetch the cached result of) one stage
pub async fn run_stage(
    State(state): State<ApiState>,
    Path((video_id, stage)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let kind: StageKind = stage.parse().map_err(reject)?;
    let output = state
        .orchestrator
        .run_stage(&video_id, kind)
        .await
        .map_err(reject)?;
    Ok(Json(output))
}

/// Caption the video's frames
pub async fn caption_video(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let captions = state
        .orchestrator
        .caption(&video_id)
        .await
        .map_err(reject)?;
    Ok(Json(captions))
}

/// One chat turn about the video
pub async fn chat(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let reply = state
        .orchestrator
        .chat(&video_id, &request.message)
        .await
        .map_err(reject)?;
    Ok(Json(ChatResponse { reply }))
}

/// Conversation state and history
pub async fn chat_history(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .orchestrator
        .history(&video_id)
        .await
        .map_err(reject)?;
    Ok(Json(snapshot))
}

/// Forget the conversation
pub async fn reset_chat(
    State(state): State<ApiState>,
    Path(video_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.asset(&video_id).await.map_err(reject)?;
    let reset = state.orchestrator.reset_session(&video_id);
    Ok(Json(ResetResponse { video_id, reset }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::RejectedFormat("a.txt".into()), 400),
            (
                PipelineError::DurationExceeded {
                    duration: 121.0,
                    max: 120.0,
                },
                400,
            ),
            (PipelineError::UnreadableVideo("x".into()), 400),
            (PipelineError::InvalidRequest("x".into()), 400),
            (PipelineError::ArtifactNotFound("x".into()), 404),
            (PipelineError::CaptionsNotReady("x".into()), 404),
            (
                PipelineError::StageTimeout {
                    stage: "captions".into(),
                    seconds: 5,
                },
                504,
            ),
            (PipelineError::ChatUnavailable("x".into()), 502),
            (PipelineError::Internal("x".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err).as_u16(), expected, "{err}");
        }
    }

    #[test]
    fn test_rejection_body_is_the_message() {
        let (status, body) = reject(PipelineError::CaptionsNotReady("v1".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Captions not ready for video v1");
    }
}
