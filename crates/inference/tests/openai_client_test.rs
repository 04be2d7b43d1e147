//! OpenAI-compatible clients against a local fake endpoint

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use image::RgbImage;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use video_grounding_inference::openai::{OpenAiCaptioner, OpenAiChat};
use video_grounding_inference::{
    CapabilityError, Captioner, ChatCompleter, ChatMessage, OpenAiEndpoint,
};

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    recorded.requests.lock().unwrap().push((auth, body.clone()));

    match body["model"].as_str() {
        Some("broken") => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"message": "model not found"}})),
        ),
        Some("overloaded") => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": {"message": "try later"}})),
        ),
        Some("silent") => (
            StatusCode::OK,
            Json(json!({"choices": [{"message": {"content": "   "}}]})),
        ),
        Some("slow") => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            (StatusCode::OK, Json(json!({"choices": []})))
        }
        _ => {
            let turns = body["messages"].as_array().map_or(0, Vec::len);
            (
                StatusCode::OK,
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": format!(" saw {turns} messages ")}}]
                })),
            )
        }
    }
}

async fn fake_server() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), recorded)
}

fn endpoint(base_url: &str, model: &str) -> OpenAiEndpoint {
    OpenAiEndpoint {
        base_url: base_url.to_string(),
        model: model.to_string(),
        api_key: Some("test-key".to_string()),
    }
}

#[tokio::test]
async fn test_chat_sends_full_history() {
    let (base, recorded) = fake_server().await;
    let chat = OpenAiChat::new(endpoint(&base, "llama3"), Duration::from_secs(5)).unwrap();

    let history = vec![
        ChatMessage::system("You are a helpful assistant"),
        ChatMessage::user("what happens?"),
        ChatMessage::assistant("a person walks"),
        ChatMessage::user("then?"),
    ];
    let reply = chat.complete(&history).await.unwrap();
    assert_eq!(reply, "saw 4 messages");

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "llama3");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][2]["role"], "assistant");
    assert_eq!(body["messages"][3]["content"], "then?");
}

#[tokio::test]
async fn test_caption_sends_image() {
    let (base, recorded) = fake_server().await;
    let captioner =
        OpenAiCaptioner::new(endpoint(&base, "vision"), Duration::from_secs(5)).unwrap();

    let caption = captioner.caption(&RgbImage::new(16, 16)).await.unwrap();
    assert_eq!(caption, "saw 1 messages");
    assert_eq!(captioner.model_id(), "vision");

    let requests = recorded.requests.lock().unwrap();
    let content = &requests[0].1["messages"][0]["content"];
    assert_eq!(content[0]["type"], "text");
    assert!(content[1]["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let (base, _) = fake_server().await;

    let broken = OpenAiChat::new(endpoint(&base, "broken"), Duration::from_secs(5)).unwrap();
    let err = broken.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(matches!(err, CapabilityError::InvalidInput(ref m) if m.contains("model not found")));
    assert!(!err.is_retryable());

    let overloaded =
        OpenAiChat::new(endpoint(&base, "overloaded"), Duration::from_secs(5)).unwrap();
    let err = overloaded
        .complete(&[ChatMessage::user("hi")])
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_blank_completion_is_invalid_output() {
    let (base, _) = fake_server().await;
    let chat = OpenAiChat::new(endpoint(&base, "silent"), Duration::from_secs(5)).unwrap();
    let err = chat.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(matches!(err, CapabilityError::InvalidOutput(_)));
}

#[tokio::test]
async fn test_client_timeout_maps_to_timeout() {
    let (base, _) = fake_server().await;
    let chat = OpenAiChat::new(endpoint(&base, "slow"), Duration::from_millis(200)).unwrap();
    let err = chat.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(matches!(err, CapabilityError::Timeout(_)));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    let chat = OpenAiChat::new(
        endpoint("http://127.0.0.1:9/v1", "llama3"),
        Duration::from_secs(2),
    )
    .unwrap();
    let err = chat.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(matches!(err, CapabilityError::Unavailable(_)));
}
