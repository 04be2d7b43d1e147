//! Captioning and chat over OpenAI-compatible `/chat/completions` endpoints

use crate::config::OpenAiEndpoint;
use crate::{CapabilityError, CapabilityResult, Captioner, ChatCompleter, ChatMessage};
use async_trait::async_trait;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Instruction sent with every frame to caption
pub const CAPTION_PROMPT: &str =
    "Describe this video frame in one short sentence. Mention the main objects and what they are doing.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Thin client for one endpoint/model pair
#[derive(Debug, Clone)]
struct CompletionClient {
    client: Client,
    endpoint: OpenAiEndpoint,
    timeout: Duration,
}

impl CompletionClient {
    fn new(endpoint: OpenAiEndpoint, timeout: Duration) -> CapabilityResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    async fn complete(
        &self,
        messages: Vec<WireMessage>,
        max_tokens: Option<u32>,
    ) -> CapabilityResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.endpoint.model,
            messages,
            temperature: 0.2,
            max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Timeout(self.timeout)
            } else {
                CapabilityError::Unavailable(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => "unknown error".to_string(),
            };
            let err = format!("{} returned {status}: {message}", self.endpoint.model);
            // Client errors will not improve with a retry
            return Err(if status.is_client_error() && status.as_u16() != 429 {
                CapabilityError::InvalidInput(err)
            } else {
                CapabilityError::Unavailable(err)
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidOutput(format!("malformed response: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CapabilityError::InvalidOutput("empty completion".to_string()))?;

        debug!("{} replied with {} chars", self.endpoint.model, text.len());
        Ok(text)
    }
}

/// Frame captions from a vision-capable chat model
#[derive(Debug, Clone)]
pub struct OpenAiCaptioner {
    client: CompletionClient,
    prompt: String,
}

impl OpenAiCaptioner {
    pub fn new(endpoint: OpenAiEndpoint, timeout: Duration) -> CapabilityResult<Self> {
        Ok(Self {
            client: CompletionClient::new(endpoint, timeout)?,
            prompt: CAPTION_PROMPT.to_string(),
        })
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

/// Encode a frame as a `data:` URL
fn jpeg_data_url(frame: &RgbImage) -> CapabilityResult<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 85)
        .encode_image(frame)
        .map_err(|e| CapabilityError::InvalidInput(format!("failed to encode frame: {e}")))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(format!("data:image/jpeg;base64,{encoded}"))
}

#[async_trait]
impl Captioner for OpenAiCaptioner {
    fn model_id(&self) -> &str {
        &self.client.endpoint.model
    }

    async fn caption(&self, frame: &RgbImage) -> CapabilityResult<String> {
        let url = jpeg_data_url(frame)?;
        let message = WireMessage {
            role: "user",
            content: WireContent::Parts(vec![
                ContentPart::Text {
                    text: self.prompt.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                },
            ]),
        };
        self.client.complete(vec![message], Some(64)).await
    }
}

/// Chat completions carrying the full history on every call
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: CompletionClient,
}

impl OpenAiChat {
    pub fn new(endpoint: OpenAiEndpoint, timeout: Duration) -> CapabilityResult<Self> {
        Ok(Self {
            client: CompletionClient::new(endpoint, timeout)?,
        })
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, history: &[ChatMessage]) -> CapabilityResult<String> {
        let messages = history
            .iter()
            .map(|message| WireMessage {
                role: message.role.as_str(),
                content: WireContent::Text(message.text.clone()),
            })
            .collect();
        self.client.complete(messages, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_message_shape() {
        let message = WireMessage {
            role: "user",
            content: WireContent::Parts(vec![
                ContentPart::Text {
                    text: "describe".into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/jpeg;base64,AAAA".into(),
                    },
                },
            ]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
    }

    #[test]
    fn test_data_url_is_jpeg() {
        let url = jpeg_data_url(&RgbImage::new(8, 8)).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,/9j/"));
    }
}
