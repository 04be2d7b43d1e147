use crate::config::ActionSettings;
use crate::stage::{Stage, UnitFailure, UnitOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use video_grounding_common::{
    checked_confidence, ActionRecord, PipelineError, Result, StageKind, VideoAsset,
};
use video_grounding_decoder::VideoSource;
use video_grounding_inference::{ActionRecognizer, CallPolicy, CapabilityError};
use video_grounding_storage::AssetStore;

/// Frame rate assumed when the container reports none
const FALLBACK_FPS: u64 = 30;

/// A clip window starting at a whole second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionUnit {
    pub start_seconds: u32,
    pub start_frame: u64,
}

/// Clip windows over a stream of `frame_count` frames at `fps`
///
/// The frame rate is truncated to whole frames per second (29.97 counts as
/// 29). Windows start every `interval_seconds` within the whole-second
/// duration.
#[must_use]
pub fn plan_windows(frame_count: u64, fps: f64, interval_seconds: u32) -> Vec<ActionUnit> {
    let fps = match fps.trunc() as u64 {
        0 => FALLBACK_FPS,
        fps => fps,
    };
    let duration = frame_count / fps;
    (0..duration)
        .step_by(interval_seconds.max(1) as usize)
        .map(|t| ActionUnit {
            start_seconds: u32::try_from(t).unwrap_or(u32::MAX),
            start_frame: t * fps,
        })
        .collect()
}

/// Action recognition over fixed-length clips read straight from the source
pub struct ActionStage {
    recognizer: Arc<dyn ActionRecognizer>,
    source: Arc<dyn VideoSource>,
    store: AssetStore,
    settings: ActionSettings,
}

impl ActionStage {
    pub fn new(
        recognizer: Arc<dyn ActionRecognizer>,
        source: Arc<dyn VideoSource>,
        store: AssetStore,
        settings: ActionSettings,
    ) -> Self {
        Self {
            recognizer,
            source,
            store,
            settings,
        }
    }
}

#[async_trait]
impl Stage for ActionStage {
    type Unit = ActionUnit;
    type Record = ActionRecord;

    fn kind(&self) -> StageKind {
        StageKind::Actions
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.recognizer.model_id(),
            "clip_length": self.settings.clip_length,
            "interval_seconds": self.settings.interval_seconds,
            "clip_size": self.settings.clip_size,
        })
    }

    async fn plan(&self, asset: &VideoAsset) -> Result<Vec<ActionUnit>> {
        let source = self.source.clone();
        let path = self.store.resolve(&asset.stored_path);
        let probe = tokio::task::spawn_blocking(move || source.probe(&path))
            .await
            .map_err(|e| PipelineError::Internal(format!("probe task failed: {e}")))??;

        Ok(plan_windows(
            probe.frame_count,
            probe.fps,
            self.settings.interval_seconds,
        ))
    }

    fn unit_key(&self, unit: &ActionUnit) -> String {
        format!("{} sec", unit.start_seconds)
    }

    async fn process(
        &self,
        asset: &VideoAsset,
        unit: &ActionUnit,
        calls: &CallPolicy,
    ) -> std::result::Result<UnitOutcome<ActionRecord>, UnitFailure> {
        let source = self.source.clone();
        let path = self.store.resolve(&asset.stored_path);
        let (start, length, size) = (
            unit.start_frame,
            self.settings.clip_length,
            self.settings.clip_size,
        );
        let clip = tokio::task::spawn_blocking(move || source.read_clip(&path, start, length, size))
            .await
            .map_err(|e| PipelineError::Internal(format!("clip read task failed: {e}")))??;

        if clip.len() < length {
            return Ok(UnitOutcome::Skipped(format!(
                "clip has {} of {} frames",
                clip.len(),
                length
            )));
        }

        let prediction = calls
            .call("action recognition", || self.recognizer.recognize(&clip))
            .await?;
        let confidence = checked_confidence(prediction.confidence).ok_or_else(|| {
            CapabilityError::InvalidOutput(format!(
                "confidence {} outside [0, 1]",
                prediction.confidence
            ))
        })?;

        Ok(UnitOutcome::Done(ActionRecord {
            start_seconds: unit.start_seconds,
            label: prediction.label,
            confidence,
        }))
    }
}
