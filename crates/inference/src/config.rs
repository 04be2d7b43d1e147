//! Backend configuration from the environment

use std::path::PathBuf;
use std::time::Duration;

/// Default OpenAI-compatible endpoint (Groq)
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "llama3-70b-8192";

/// Default vision model for captions
pub const DEFAULT_CAPTION_MODEL: &str = "llama-3.2-11b-vision-preview";

/// HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// An OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiEndpoint {
    pub base_url: String,
    pub model: String,
    /// Optional for local endpoints
    pub api_key: Option<String>,
}

/// Where each capability's backend lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    /// `YOLOv8` ONNX model
    pub detector_model: Option<PathBuf>,
    /// VideoMAE-style ONNX clip classifier
    pub action_model: Option<PathBuf>,
    /// Class labels of the action model, one per line
    pub action_labels: Option<PathBuf>,
    pub caption: OpenAiEndpoint,
    pub chat: OpenAiEndpoint,
    pub request_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            detector_model: None,
            action_model: None,
            action_labels: None,
            caption: OpenAiEndpoint {
                base_url: DEFAULT_BASE_URL.to_string(),
                model: DEFAULT_CAPTION_MODEL.to_string(),
                api_key: None,
            },
            chat: OpenAiEndpoint {
                base_url: DEFAULT_BASE_URL.to_string(),
                model: DEFAULT_CHAT_MODEL.to_string(),
                api_key: None,
            },
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl InferenceConfig {
    /// Read `DETECTOR_MODEL`, `ACTION_MODEL`, `ACTION_LABELS`, `CHAT_*`,
    /// `CAPTION_*` and `GROQ_API_KEY`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let shared_key = var("GROQ_API_KEY");
        let chat_key = var("CHAT_API_KEY").or_else(|| shared_key.clone());
        let chat_base = var("CHAT_BASE_URL").unwrap_or(defaults.chat.base_url);

        let chat = OpenAiEndpoint {
            model: var("CHAT_MODEL").unwrap_or(defaults.chat.model),
            api_key: chat_key.clone(),
            base_url: chat_base.clone(),
        };
        // Captions default to the chat endpoint and credentials
        let caption = OpenAiEndpoint {
            base_url: var("CAPTION_BASE_URL").unwrap_or(chat_base),
            model: var("CAPTION_MODEL").unwrap_or(defaults.caption.model),
            api_key: var("CAPTION_API_KEY").or(chat_key),
        };

        Self {
            detector_model: var("DETECTOR_MODEL").map(PathBuf::from),
            action_model: var("ACTION_MODEL").map(PathBuf::from),
            action_labels: var("ACTION_LABELS").map(PathBuf::from),
            caption,
            chat,
            request_timeout: var("INFERENCE_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map_or(defaults.request_timeout, Duration::from_secs),
        }
    }
}
