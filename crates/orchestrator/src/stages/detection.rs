use super::{load_frame, strided_frames, FrameUnit};
use crate::config::DetectionSettings;
use crate::stage::{Stage, UnitFailure, UnitOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use video_grounding_common::{
    checked_confidence, FrameDetections, Result, StageKind, VideoAsset,
};
use video_grounding_frames::FrameSampler;
use video_grounding_inference::{CallPolicy, Detector};

/// Object detection over every Nth frame of the frame set
pub struct DetectionStage {
    detector: Arc<dyn Detector>,
    frames: FrameSampler,
    settings: DetectionSettings,
    frame_rate_seconds: f64,
}

impl DetectionStage {
    pub fn new(
        detector: Arc<dyn Detector>,
        frames: FrameSampler,
        settings: DetectionSettings,
        frame_rate_seconds: f64,
    ) -> Self {
        Self {
            detector,
            frames,
            settings,
            frame_rate_seconds,
        }
    }
}

#[async_trait]
impl Stage for DetectionStage {
    type Unit = FrameUnit;
    type Record = FrameDetections;

    fn kind(&self) -> StageKind {
        StageKind::Detection
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.detector.model_id(),
            "confidence_threshold": self.settings.confidence_threshold,
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
    ) -> std::result::Result<UnitOutcome<FrameDetections>, UnitFailure> {
        let image = load_frame(unit.path.clone()).await?;
        let detections = calls
            .call("detection", || self.detector.detect(&image))
            .await?;

        let threshold = self.settings.confidence_threshold;
        let kept = detections
            .into_iter()
            .filter(|d| match checked_confidence(d.confidence) {
                Some(confidence) => confidence >= threshold,
                None => {
                    warn!(
                        "Discarding {} in {} with confidence {}",
                        d.label, unit.frame.name, d.confidence
                    );
                    false
                }
            })
            .collect();
        Ok(UnitOutcome::Done(kept))
    }
}
