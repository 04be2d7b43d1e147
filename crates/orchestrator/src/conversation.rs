//! Per-video conversation sessions
//!
//! A session starts `Uninitialized` and becomes `Grounded` once, when the
//! caption summary is injected as its only system message. After that the
//! history only grows by user/assistant turns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use video_grounding_common::{CaptionRecord, PipelineError, Result, StageArtifact};
use video_grounding_inference::{CallPolicy, CapabilityError, ChatCompleter, ChatMessage};

/// System prompt preceding the caption summary
pub const GROUNDING_PREAMBLE: &str =
    "You are a helpful assistant that helps users understand videos. Here is the video summary:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Grounded,
}

/// One line per captioned frame, `"<frame>: <caption>"`, in frame order
#[must_use]
pub fn caption_summary(captions: &StageArtifact<CaptionRecord>) -> String {
    let mut entries: Vec<_> = captions.entries.iter().collect();
    entries.sort_by_key(|entry| entry.value.frame_index);
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.key, entry.value.caption))
        .collect::<Vec<_>>()
        .join("\n")
}

#[must_use]
pub fn grounding_prompt(summary: &str) -> String {
    format!("{GROUNDING_PREAMBLE}{summary}\n")
}

/// Map a failed chat call onto the pipeline taxonomy
fn chat_error(err: CapabilityError) -> PipelineError {
    match err {
        CapabilityError::Timeout(limit) => PipelineError::StageTimeout {
            stage: "chat".to_string(),
            seconds: limit.as_secs(),
        },
        other => PipelineError::ChatUnavailable(other.to_string()),
    }
}

/// Append-only chat history about one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    video_id: String,
    state: SessionState,
    history: Vec<ChatMessage>,
}

impl ConversationSession {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            state: SessionState::Uninitialized,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    #[must_use]
    pub fn is_grounded(&self) -> bool {
        self.state == SessionState::Grounded
    }

    /// Inject the caption summary as the system message
    ///
    /// Returns false, changing nothing, when the session is already grounded.
    pub fn ground(&mut self, captions: &StageArtifact<CaptionRecord>) -> bool {
        if self.is_grounded() {
            debug!("Session for video {} already grounded", self.video_id);
            return false;
        }

        let prompt = grounding_prompt(&caption_summary(captions));
        self.history.insert(0, ChatMessage::system(prompt));
        self.state = SessionState::Grounded;
        info!(
            "Grounded session for video {} with {} captions",
            self.video_id,
            captions.entries.len()
        );
        true
    }

    /// Record a user message, ask the chat model with the whole history and
    /// record its reply
    ///
    /// On failure the user message stays in the history without a reply.
    pub async fn turn(
        &mut self,
        chat: &dyn ChatCompleter,
        calls: &CallPolicy,
        user_text: &str,
    ) -> Result<String> {
        if !self.is_grounded() {
            return Err(PipelineError::CaptionsNotReady(self.video_id.clone()));
        }

        self.history.push(ChatMessage::user(user_text));
        let history = &self.history;
        let reply = calls
            .call("chat", || chat.complete(history))
            .await
            .map_err(|e| {
                warn!("Chat turn for video {} failed: {}", self.video_id, e);
                chat_error(e)
            })?;

        self.history.push(ChatMessage::assistant(reply.clone()));
        debug!(
            "Session for video {} now has {} messages",
            self.video_id,
            self.history.len()
        );
        Ok(reply)
    }
}

/// Sessions by video id, each behind its own async mutex
///
/// Holding a session's mutex for a whole turn serializes turns per video.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<ConversationSession>>>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The video's session, created on first use
    pub fn session(&self, video_id: &str) -> Arc<tokio::sync::Mutex<ConversationSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(video_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ConversationSession::new(video_id))))
            .clone()
    }

    /// The video's session if one exists
    #[must_use]
    pub fn get(&self, video_id: &str) -> Option<Arc<tokio::sync::Mutex<ConversationSession>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(video_id)
            .cloned()
    }

    /// Forget the video's session; the next turn starts a fresh one
    pub fn remove(&self, video_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(video_id)
            .is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
