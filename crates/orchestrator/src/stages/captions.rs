use super::{load_frame, strided_frames, FrameUnit};
use crate::config::CaptionSettings;
use crate::stage::{Stage, UnitFailure, UnitOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use video_grounding_common::{CaptionRecord, Result, StageKind, VideoAsset};
use video_grounding_frames::FrameSampler;
use video_grounding_inference::{CallPolicy, CapabilityError, Captioner};

/// One caption per Nth frame of the frame set
pub struct CaptionStage {
    captioner: Arc<dyn Captioner>,
    frames: FrameSampler,
    settings: CaptionSettings,
    frame_rate_seconds: f64,
}

impl CaptionStage {
    pub fn new(
        captioner: Arc<dyn Captioner>,
        frames: FrameSampler,
        settings: CaptionSettings,
        frame_rate_seconds: f64,
    ) -> Self {
        Self {
            captioner,
            frames,
            settings,
            frame_rate_seconds,
        }
    }
}

#[async_trait]
impl Stage for CaptionStage {
    type Unit = FrameUnit;
    type Record = CaptionRecord;

    fn kind(&self) -> StageKind {
        StageKind::Captions
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.captioner.model_id(),
            "frame_stride": self.settings.frame_stride,
            "frame_rate_seconds": self.frame_rate_seconds,
        })
    }

    async fn plan(&self, asset: &VideoAsset) -> Result<Vec<FrameUnit>> {
        strided_frames(
            &self.frames,
            asset,
            self.frame_rate_seconds,
            self.settings.frame_stride,
        )
        .await
    }

    fn unit_key(&self, unit: &FrameUnit) -> String {
        unit.frame.name.clone()
    }

    async fn process(
        &self,
        _asset: &VideoAsset,
        unit: &FrameUnit,
        calls: &CallPolicy,
    ) -> std::result::Result<UnitOutcome<CaptionRecord>, UnitFailure> {
        let image = load_frame(unit.path.clone()).await?;
        let caption = calls
            .call("caption", || self.captioner.caption(&image))
            .await?;

        let caption = caption.trim();
        if caption.is_empty() {
            return Err(CapabilityError::InvalidOutput("empty caption".to_string()).into());
        }
        Ok(UnitOutcome::Done(CaptionRecord {
            frame_index: unit.frame.index,
            caption: caption.to_string(),
        }))
    }
}
