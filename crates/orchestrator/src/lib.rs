//! Video grounding orchestrator
//!
//! Sequences admission, frame extraction and the derivation stages for
//! uploads, and exposes every step as an independent re-entry point:
//!
//! ```text
//! ingest:  admit -> extract frames (1s) -> detection -> actions
//! later:   run_stage / caption -> ground -> chat
//! ```
//!
//! Captioning and chat are never run eagerly. All artifact mutation for a
//! video happens under that video's lock.

pub mod config;
pub mod conversation;
pub mod stage;
pub mod stages;

pub use config::{ConfigError, PipelineConfig};
pub use conversation::{ConversationSession, SessionRegistry, SessionState};
pub use stage::{Stage, StageRunner, UnitFailure, UnitOutcome};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};
use video_grounding_common::{
    ActionRecord, CaptionRecord, FrameDetections, FrameSet, PipelineError, Result, StageArtifact,
    StageKind, VideoAsset,
};
use video_grounding_decoder::VideoSource;
use video_grounding_frames::{validate_rate, FrameSampler};
use video_grounding_inference::{Capabilities, ChatMessage};
use video_grounding_ingestion::AdmissionControl;
use video_grounding_storage::{AssetStore, KeyedLocks};

/// One detection flattened for the upload response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPreview {
    pub frame: String,
    pub label: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// Outcome of an upload
///
/// Once admission succeeds the asset is kept; a failure in the eager stages
/// is reported in `pipeline_error` and the stages can be re-run later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub video_id: String,
    pub asset: VideoAsset,
    pub frame_count: usize,
    pub detections: Vec<DetectionPreview>,
    pub actions: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_error: Option<String>,
}

/// Result of a single stage run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutput {
    Detection(StageArtifact<FrameDetections>),
    Actions(StageArtifact<ActionRecord>),
    Captions(StageArtifact<CaptionRecord>),
}

/// Point-in-time copy of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub video_id: String,
    pub state: SessionState,
    pub history: Vec<ChatMessage>,
}

impl From<&ConversationSession> for SessionSnapshot {
    fn from(session: &ConversationSession) -> Self {
        Self {
            video_id: session.video_id().to_string(),
            state: session.state(),
            history: session.history().to_vec(),
        }
    }
}

/// Flatten the first `limit` detections in frame order
#[must_use]
pub fn preview_detections(
    artifact: &StageArtifact<FrameDetections>,
    limit: usize,
) -> Vec<DetectionPreview> {
    artifact
        .entries
        .iter()
        .flat_map(|entry| {
            entry.value.iter().map(move |d| DetectionPreview {
                frame: entry.key.clone(),
                label: d.label.clone(),
                confidence: d.confidence,
                bbox: d.bbox,
            })
        })
        .take(limit)
        .collect()
}

/// The pipeline façade shared by every request
#[derive(Clone)]
pub struct Orchestrator {
    config: PipelineConfig,
    store: AssetStore,
    source: Arc<dyn VideoSource>,
    capabilities: Capabilities,
    admission: AdmissionControl,
    frames: FrameSampler,
    runner: StageRunner,
    locks: KeyedLocks,
    sessions: SessionRegistry,
}

impl Orchestrator {
    /// Orchestrator over the asset store described by `config`
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn VideoSource>,
        capabilities: Capabilities,
    ) -> Self {
        let store = config.asset_store();
        Self::with_store(config, store, source, capabilities)
    }

    pub fn with_store(
        config: PipelineConfig,
        store: AssetStore,
        source: Arc<dyn VideoSource>,
        capabilities: Capabilities,
    ) -> Self {
        let locks = KeyedLocks::new();
        let admission =
            AdmissionControl::new(store.clone(), source.clone(), config.admission_policy());
        let frames = FrameSampler::new(store.clone(), source.clone());
        let runner = StageRunner::new(
            store.clone(),
            locks.clone(),
            config.call_policy(),
            config.stage_timeout(),
        );

        Self {
            config,
            store,
            source,
            capabilities,
            admission,
            frames,
            runner,
            locks,
            sessions: SessionRegistry::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    /// Admit an upload and run the eager stages
    ///
    /// Admission failures are returned as errors; anything after admission
    /// lands in [`IngestReport::pipeline_error`].
    pub async fn ingest<R>(&self, reader: &mut R, filename: &str) -> Result<IngestReport>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let asset = self.admission.admit(reader, filename).await?;
        let mut report = IngestReport {
            video_id: asset.id.clone(),
            asset,
            frame_count: 0,
            detections: Vec::new(),
            actions: Vec::new(),
            pipeline_error: None,
        };

        if let Err(e) = self.run_eager(&mut report).await {
            warn!(
                "Eager pipeline failed for video {}: {}",
                report.video_id, e
            );
            report.pipeline_error = Some(e.to_string());
        }
        Ok(report)
    }

    async fn run_eager(&self, report: &mut IngestReport) -> Result<()> {
        let frame_set = self
            .extract_frames(&report.video_id, Some(self.config.frame_rate_seconds))
            .await?;
        report.frame_count = frame_set.len();

        let detections = self.detect(&report.video_id).await?;
        report.detections = preview_detections(&detections, self.config.upload_preview_limit);

        let actions = self.recognize_actions(&report.video_id).await?;
        report.actions = actions.entries.into_iter().map(|e| e.value).collect();

        info!(
            "Ingested video {}: {} frames, {} detections previewed, {} actions",
            report.video_id,
            report.frame_count,
            report.detections.len(),
            report.actions.len()
        );
        Ok(())
    }

    /// Stored metadata of an admitted video
    pub async fn asset(&self, video_id: &str) -> Result<VideoAsset> {
        Ok(self.store.require_asset(video_id).await?)
    }

    /// (Re-)extract frames at `rate` seconds, defaulting to the configured rate
    pub async fn extract_frames(&self, video_id: &str, rate: Option<f64>) -> Result<FrameSet> {
        let rate = rate.unwrap_or(self.config.frame_rate_seconds);
        validate_rate(rate)?;
        let asset = self.asset(video_id).await?;

        let _guard = self.locks.lock(video_id).await;
        self.frames.extract(&asset, rate).await
    }

    /// Run one stage by kind
    pub async fn run_stage(&self, video_id: &str, kind: StageKind) -> Result<StageOutput> {
        Ok(match kind {
            StageKind::Detection => StageOutput::Detection(self.detect(video_id).await?),
            StageKind::Actions => StageOutput::Actions(self.recognize_actions(video_id).await?),
            StageKind::Captions => StageOutput::Captions(self.caption(video_id).await?),
        })
    }

    pub async fn detect(&self, video_id: &str) -> Result<StageArtifact<FrameDetections>> {
        let asset = self.asset(video_id).await?;
        let stage = stages::DetectionStage::new(
            self.capabilities.detector.clone(),
            self.frames.clone(),
            self.config.detection.clone(),
            self.config.frame_rate_seconds,
        );
        self.runner.run(&stage, &asset).await
    }

    pub async fn recognize_actions(&self, video_id: &str) -> Result<StageArtifact<ActionRecord>> {
        let asset = self.asset(video_id).await?;
        let stage = stages::ActionStage::new(
            self.capabilities.action_recognizer.clone(),
            self.source.clone(),
            self.store.clone(),
            self.config.actions.clone(),
        );
        self.runner.run(&stage, &asset).await
    }

    /// Caption every Nth frame; requires extracted frames
    pub async fn caption(&self, video_id: &str) -> Result<StageArtifact<CaptionRecord>> {
        let asset = self.asset(video_id).await?;
        let stage = stages::CaptionStage::new(
            self.capabilities.captioner.clone(),
            self.frames.clone(),
            self.config.captioning.clone(),
            self.config.frame_rate_seconds,
        );
        self.runner.run(&stage, &asset).await
    }

    /// Ground the video's session in its captions; a no-op once grounded
    pub async fn ground(&self, video_id: &str) -> Result<SessionSnapshot> {
        self.asset(video_id).await?;
        let session = self.sessions.session(video_id);
        let mut session = session.lock().await;
        self.ensure_grounded(&mut session).await?;
        Ok(SessionSnapshot::from(&*session))
    }

    async fn ensure_grounded(&self, session: &mut ConversationSession) -> Result<()> {
        if session.is_grounded() {
            return Ok(());
        }
        let captions = self
            .store
            .load_artifact::<StageArtifact<CaptionRecord>>(session.video_id(), StageKind::Captions)
            .await?
            .ok_or_else(|| PipelineError::CaptionsNotReady(session.video_id().to_string()))?;
        session.ground(&captions);
        Ok(())
    }

    /// One chat turn; turns for the same video run one at a time
    pub async fn chat(&self, video_id: &str, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        self.asset(video_id).await?;

        let session = self.sessions.session(video_id);
        let mut session = session.lock().await;
        self.ensure_grounded(&mut session).await?;
        session
            .turn(
                self.capabilities.chat.as_ref(),
                &self.config.call_policy(),
                message,
            )
            .await
    }

    /// Current conversation, empty and uninitialized if none was started
    pub async fn history(&self, video_id: &str) -> Result<SessionSnapshot> {
        self.asset(video_id).await?;
        Ok(match self.sessions.get(video_id) {
            Some(session) => SessionSnapshot::from(&*session.lock().await),
            None => SessionSnapshot::from(&ConversationSession::new(video_id)),
        })
    }

    /// Drop the video's conversation; returns whether one existed
    pub fn reset_session(&self, video_id: &str) -> bool {
        let removed = self.sessions.remove(video_id);
        if removed {
            info!("Reset conversation for video {}", video_id);
        }
        removed
    }
}
