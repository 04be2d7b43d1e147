//! End-to-end pipeline runs
//!
//! The synthetic suite drives upload, eager stages, captioning and chat
//! through the orchestrator and validates every persisted document.
//!
//! The FFmpeg suite needs a real clip and model-free mocks only:
//!   VIDEO_GROUNDING_TEST_VIDEO=/path/to/clip.mp4 cargo test --test end_to_end_test -- --ignored

mod common;

use common::validators::{validate_actions, validate_captions, validate_detections};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use video_grounding_common::StageKind;
use video_grounding_decoder::{synthetic, FfmpegVideoSource, SyntheticVideoSource, VideoSource};
use video_grounding_inference::mock::{
    MockActionRecognizer, MockCaptioner, MockChat, MockDetector,
};
use video_grounding_inference::{Capabilities, Role};
use video_grounding_orchestrator::{Orchestrator, PipelineConfig, SessionState};

fn mock_capabilities() -> Capabilities {
    Capabilities {
        detector: Arc::new(MockDetector::person(0.9)),
        action_recognizer: Arc::new(MockActionRecognizer::default()),
        captioner: Arc::new(MockCaptioner::new()),
        chat: Arc::new(MockChat::new()),
    }
}

fn orchestrator(dir: &TempDir, source: Arc<dyn VideoSource>) -> Orchestrator {
    let mut config = PipelineConfig::default();
    config.storage_root = dir.path().to_path_buf();
    config.calls.retries = 0;
    Orchestrator::new(config, source, mock_capabilities())
}

async fn load_document(orchestrator: &Orchestrator, video_id: &str, kind: StageKind) -> Value {
    orchestrator
        .store()
        .load_artifact::<Value>(video_id, kind)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{} artifact missing", kind.artifact_name()))
}

async fn assert_artifacts_valid(orchestrator: &Orchestrator, video_id: &str) {
    let detections = load_document(orchestrator, video_id, StageKind::Detection).await;
    let actions = load_document(orchestrator, video_id, StageKind::Actions).await;
    let captions = load_document(orchestrator, video_id, StageKind::Captions).await;

    for (name, result) in [
        ("detections", validate_detections(&detections)),
        ("actions", validate_actions(&actions)),
        ("captions", validate_captions(&captions)),
    ] {
        assert!(result.is_valid(), "{name}: {:?}", result.errors);
    }
}

#[tokio::test]
async fn test_synthetic_video_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir, Arc::new(SyntheticVideoSource::new()));

    let header = synthetic::header(25.0, 500, 96, 64);
    let report = orchestrator
        .ingest(&mut header.as_bytes(), "walk.MOV")
        .await
        .unwrap();
    assert!(report.pipeline_error.is_none(), "{:?}", report.pipeline_error);
    assert_eq!(report.frame_count, 20);
    assert_eq!(report.actions.len(), 7);

    let video_id = report.video_id.clone();
    let captions = orchestrator.caption(&video_id).await.unwrap();
    assert_eq!(captions.entries.len(), 4);

    let reply = orchestrator.chat(&video_id, "Who is walking?").await.unwrap();
    assert_eq!(reply, MockChat::reply_for("Who is walking?"));

    let snapshot = orchestrator.history(&video_id).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Grounded);
    let roles: Vec<Role> = snapshot.history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert!(snapshot.history[0].text.contains("frame_0000.jpg: a 96x64 frame"));

    assert_artifacts_valid(&orchestrator, &video_id).await;

    let stored = orchestrator.store().list_artifacts(&video_id).await.unwrap();
    for name in ["detections.json", "actions.json", "captions.json"] {
        assert!(stored.iter().any(|s| s == name), "{name} not in {stored:?}");
    }
}

#[tokio::test]
async fn test_restart_reuses_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let first = orchestrator(&dir, Arc::new(SyntheticVideoSource::new()));
    let header = synthetic::header(30.0, 240, 64, 48);
    let report = first.ingest(&mut header.as_bytes(), "clip.avi").await.unwrap();
    let before = first.detect(&report.video_id).await.unwrap();

    // A fresh orchestrator over the same root finds everything on disk
    let detector = Arc::new(MockDetector::person(0.9));
    let mut capabilities = mock_capabilities();
    capabilities.detector = detector.clone();
    let second = Orchestrator::new(
        first.config().clone(),
        Arc::new(SyntheticVideoSource::new()),
        capabilities,
    );

    let asset = second.asset(&report.video_id).await.unwrap();
    assert_eq!(asset, report.asset);
    let after = second.detect(&report.video_id).await.unwrap();
    assert_eq!(detector.calls(), 0);
    assert_eq!(after.params_fingerprint, before.params_fingerprint);
    assert_eq!(after.entries.len(), before.entries.len());
}

fn test_video() -> Option<PathBuf> {
    std::env::var_os("VIDEO_GROUNDING_TEST_VIDEO").map(PathBuf::from)
}

#[tokio::test]
#[ignore]
async fn test_ffmpeg_video_full_run() {
    let Some(path) = test_video() else {
        eprintln!("VIDEO_GROUNDING_TEST_VIDEO not set, skipping");
        return;
    };
    let filename = path.file_name().unwrap().to_string_lossy().to_string();
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir, Arc::new(FfmpegVideoSource::new()));

    let mut file = tokio::fs::File::open(&path).await.unwrap();
    let report = orchestrator.ingest(&mut file, &filename).await.unwrap();
    assert!(report.pipeline_error.is_none(), "{:?}", report.pipeline_error);
    assert!(report.asset.duration_seconds > 0.0);
    assert!(report.frame_count > 0);

    orchestrator.caption(&report.video_id).await.unwrap();
    orchestrator
        .chat(&report.video_id, "Describe the video")
        .await
        .unwrap();

    assert_artifacts_valid(&orchestrator, &report.video_id).await;
}
