//! The three derivation stages

mod actions;
mod captions;
mod detection;

pub use actions::{plan_windows, ActionStage, ActionUnit};
pub use captions::CaptionStage;
pub use detection::DetectionStage;

use std::path::PathBuf;
use video_grounding_common::{FrameRef, FrameSet, PipelineError, Result, VideoAsset};
use video_grounding_frames::FrameSampler;

/// One frame of a frame set, resolved to its file
#[derive(Debug, Clone)]
pub struct FrameUnit {
    pub frame: FrameRef,
    pub path: PathBuf,
}

/// Every `stride`-th frame of the set extracted at `rate`
///
/// Fails with `ArtifactNotFound` when frames have not been extracted yet.
pub(crate) async fn strided_frames(
    frames: &FrameSampler,
    asset: &VideoAsset,
    rate: f64,
    stride: usize,
) -> Result<Vec<FrameUnit>> {
    let frame_set: FrameSet = frames.load(&asset.id, rate).await?.ok_or_else(|| {
        PipelineError::ArtifactNotFound(format!(
            "frames of video {} at {}s; extract frames first",
            asset.id, rate
        ))
    })?;

    frame_set
        .frames
        .iter()
        .step_by(stride.max(1))
        .map(|frame| {
            Ok(FrameUnit {
                path: frames.frame_path(&frame_set, frame)?,
                frame: frame.clone(),
            })
        })
        .collect()
}

/// Decode a stored frame off the async runtime
pub(crate) async fn load_frame(path: PathBuf) -> Result<image::RgbImage> {
    tokio::task::spawn_blocking(move || video_grounding_frames::read_frame(&path))
        .await
        .map_err(|e| PipelineError::Internal(format!("frame read task failed: {e}")))?
}
