//! S3 backend error handling against a local fake endpoint
//!
//! The fake answers every request with a fixed status and S3 error body, so
//! the backend's classification of missing keys can be checked without MinIO.

use axum::{
    extract::Request,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use video_grounding_common::StageKind;
use video_grounding_storage::*;

fn error_body(code: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>{code}</Code><Message>{code}</Message>\
         <RequestId>4442587FB7D0A2F9</RequestId></Error>"
    )
}

/// Start a fake S3 that fails every request with `status` and `code`
async fn fake_s3(status: StatusCode, code: &'static str) -> String {
    let app = Router::new().fallback(move |request: Request| async move {
        if request.method() == Method::HEAD {
            return status.into_response();
        }
        (
            status,
            [(header::CONTENT_TYPE, "application/xml")],
            error_body(code),
        )
            .into_response()
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(endpoint: String) -> S3ArtifactBackend {
    S3ArtifactBackend::new(S3Config {
        bucket: "clips".to_string(),
        region: "us-east-1".to_string(),
        endpoint: Some(endpoint),
        access_key_id: "test".to_string(),
        secret_access_key: "test".to_string(),
        prefix: String::new(),
    })
}

#[tokio::test]
async fn test_missing_key_is_none() {
    let endpoint = fake_s3(StatusCode::NOT_FOUND, "NoSuchKey").await;
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::new(dir.path(), Arc::new(backend(endpoint)));

    assert!(store.load_asset("missing").await.unwrap().is_none());
    let captions = store
        .load_artifact::<serde_json::Value>("missing", StageKind::Captions)
        .await
        .unwrap();
    assert!(captions.is_none());

    let err = store.require_asset("missing").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn test_head_not_found_is_false() {
    let endpoint = fake_s3(StatusCode::NOT_FOUND, "NoSuchKey").await;
    let backend = backend(endpoint);

    assert!(!backend.exists("missing/asset.json").await.unwrap());
}

#[tokio::test]
async fn test_access_denied_is_an_error() {
    let endpoint = fake_s3(StatusCode::FORBIDDEN, "AccessDenied").await;
    let backend = backend(endpoint);

    let err = backend.get("v1/captions.json").await.unwrap_err();
    assert!(matches!(err, StorageError::S3Error(ref msg) if msg.contains("AccessDenied")), "{err:?}");

    assert!(backend.exists("v1/captions.json").await.is_err());
}
