//! Integration tests for the asset store
//!
//! The local-filesystem tests run everywhere. The S3 test needs a live `MinIO`:
//! `cargo test --package video-grounding-storage --test storage_integration_test -- --ignored`

use std::sync::Arc;
use video_grounding_common::{StageArtifact, StageEntry, StageKind, VideoAsset, VideoFormat};
use video_grounding_storage::*;

fn asset(id: &str) -> VideoAsset {
    VideoAsset {
        id: id.to_string(),
        original_name: "clip.mp4".to_string(),
        stored_path: AssetStore::source_locator(id, VideoFormat::Mp4),
        duration_seconds: 10.0,
        format: VideoFormat::Mp4,
        frame_rate: 30.0,
        created_at: chrono::Utc::now(),
    }
}

fn artifact(id: &str, fingerprint: &str) -> StageArtifact<String> {
    StageArtifact {
        video_id: id.to_string(),
        stage: StageKind::Captions,
        params_fingerprint: fingerprint.to_string(),
        created_at: chrono::Utc::now(),
        units_planned: 1,
        units_succeeded: 1,
        units_failed: 0,
        units_skipped: 0,
        entries: vec![StageEntry {
            key: "frame_0000.jpg".to_string(),
            value: "a dog on a beach".to_string(),
        }],
    }
}

#[tokio::test]
async fn test_asset_and_artifacts_persist_across_store_instances() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = AssetStore::local(dir.path());
        store.save_asset(&asset("v1")).await.unwrap();
        store
            .store_artifact("v1", StageKind::Captions, &artifact("v1", "abc"))
            .await
            .unwrap();
    }

    let reopened = AssetStore::local(dir.path());
    let loaded = reopened.require_asset("v1").await.unwrap();
    assert_eq!(loaded.original_name, "clip.mp4");

    let captions: StageArtifact<String> = reopened
        .load_artifact("v1", StageKind::Captions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(captions.params_fingerprint, "abc");
    assert_eq!(captions.get("frame_0000.jpg").map(String::as_str), Some("a dog on a beach"));

    assert_eq!(
        reopened.list_artifacts("v1").await.unwrap(),
        vec![ASSET_DOCUMENT.to_string(), "captions.json".to_string()]
    );
}

#[tokio::test]
async fn test_missing_asset_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::local(dir.path());

    assert!(store.load_asset("nope").await.unwrap().is_none());
    assert!(matches!(
        store.require_asset("nope").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_video_deletes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::local(dir.path());

    let mut data: &[u8] = b"bytes";
    store
        .write_source("v2", VideoFormat::Mp4, &mut data)
        .await
        .unwrap();
    store.save_asset(&asset("v2")).await.unwrap();
    store
        .store_artifact("v2", StageKind::Captions, &artifact("v2", "abc"))
        .await
        .unwrap();

    store.remove_video("v2").await.unwrap();

    assert!(!dir.path().join("v2").exists());
    assert!(store.load_asset("v2").await.unwrap().is_none());
    store.remove_video("v2").await.unwrap();
}

#[tokio::test]
async fn test_shared_backend_through_trait_object() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn ArtifactBackend> = Arc::new(LocalArtifactBackend::new(dir.path()));
    let store = AssetStore::new(dir.path(), backend.clone());

    store.save_asset(&asset("v3")).await.unwrap();
    assert!(backend.exists("v3/asset.json").await.unwrap());
}

#[tokio::test]
#[ignore] // Requires MinIO running on localhost:9000
async fn test_minio_artifact_roundtrip() {
    if tokio::net::TcpStream::connect("127.0.0.1:9000").await.is_err() {
        eprintln!("MinIO not available on 127.0.0.1:9000, skipping");
        return;
    }

    let backend = Arc::new(S3ArtifactBackend::new(S3Config {
        bucket: "video-grounding".to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some("http://localhost:9000".to_string()),
        access_key_id: "minioadmin".to_string(),
        secret_access_key: "minioadmin".to_string(),
        prefix: "test/".to_string(),
    }));
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::new(dir.path(), backend);

    store
        .store_artifact("v4", StageKind::Captions, &artifact("v4", "s3"))
        .await
        .unwrap();
    let loaded: Option<StageArtifact<String>> =
        store.load_artifact("v4", StageKind::Captions).await.unwrap();
    assert_eq!(loaded.unwrap().params_fingerprint, "s3");

    store.delete_artifact("v4", StageKind::Captions).await.unwrap();
}
