//! Frame sampler
//!
//! Decomposes a video into still frames at a fixed temporal rate. Every
//! `round(fps * rate)`-th decoded frame is kept, numbered densely from 0 and
//! written as `frame_NNNN.jpg`. Frames are staged and swapped into place only
//! once the whole set is written, so a failed extraction leaves no partial set.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use video_grounding_common::{FrameRef, FrameSet, PipelineError, Result, VideoAsset};
use video_grounding_decoder::VideoSource;
use video_grounding_storage::AssetStore;

/// JPEG quality of extracted frames
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Extracts and persists [`FrameSet`]s
#[derive(Clone)]
pub struct FrameSampler {
    store: AssetStore,
    source: Arc<dyn VideoSource>,
}

/// Sample rates must be finite and positive
pub fn validate_rate(sample_rate_seconds: f64) -> Result<()> {
    if sample_rate_seconds.is_finite() && sample_rate_seconds > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidRequest(format!(
            "sample rate must be a positive number of seconds, got {sample_rate_seconds}"
        )))
    }
}

fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(image)?;
    writer.flush()?;
    Ok(())
}

/// Decode a stored frame
pub fn read_frame(path: &Path) -> Result<RgbImage> {
    let image = image::open(path)
        .map_err(|e| PipelineError::Internal(format!("failed to read frame {path:?}: {e}")))?;
    Ok(image.to_rgb8())
}

impl FrameSampler {
    pub fn new(store: AssetStore, source: Arc<dyn VideoSource>) -> Self {
        Self { store, source }
    }

    /// Extract frames, replacing any set previously stored under the same
    /// `(video_id, sample_rate_seconds)`
    pub async fn extract(&self, asset: &VideoAsset, sample_rate_seconds: f64) -> Result<FrameSet> {
        validate_rate(sample_rate_seconds)?;

        let staging = self.store.begin_frames(&asset.id, sample_rate_seconds).await?;
        let source = self.source.clone();
        let video_path = self.store.resolve(&asset.stored_path);
        let staging_dir = staging.dir().to_path_buf();

        let sampled = tokio::task::spawn_blocking(move || {
            sample_into(source.as_ref(), &video_path, staging_dir, sample_rate_seconds)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("frame extraction task failed: {e}")));

        let (source_fps, interval, frames) = match sampled {
            Ok(Ok(sampled)) => sampled,
            Ok(Err(e)) | Err(e) => {
                warn!("Frame extraction failed for video {}: {}", asset.id, e);
                self.store.abort_frames(staging).await;
                return Err(e);
            }
        };

        let frame_set = FrameSet {
            video_id: asset.id.clone(),
            sample_rate_seconds,
            source_fps,
            interval,
            frames,
        };

        if let Err(e) = self.store.commit_frames(&staging, &frame_set).await {
            self.store.abort_frames(staging).await;
            return Err(e.into());
        }

        info!(
            "Extracted {} frames from video {} (every {} frames at {:.2} fps)",
            frame_set.len(),
            asset.id,
            interval,
            source_fps
        );
        Ok(frame_set)
    }

    /// Previously extracted set, if any
    pub async fn load(&self, video_id: &str, sample_rate_seconds: f64) -> Result<Option<FrameSet>> {
        validate_rate(sample_rate_seconds)?;
        Ok(self.store.load_frame_set(video_id, sample_rate_seconds).await?)
    }

    /// Path of one frame in a committed set
    pub fn frame_path(&self, frame_set: &FrameSet, frame: &FrameRef) -> Result<PathBuf> {
        Ok(self.store.frame_path(frame_set, &frame.name)?)
    }
}

/// Blocking part of an extraction: decode, encode and write into `staging_dir`
fn sample_into(
    source: &dyn VideoSource,
    video_path: &Path,
    staging_dir: PathBuf,
    sample_rate_seconds: f64,
) -> Result<(f64, u64, Vec<FrameRef>)> {
    let probe = source.probe(video_path)?;
    let interval = FrameSet::interval_for(probe.fps, sample_rate_seconds);
    debug!(
        "Sampling {:?} every {} frames ({} fps x {}s)",
        video_path, interval, probe.fps, sample_rate_seconds
    );

    let mut frames = Vec::new();
    source.sample_frames(video_path, interval, &mut |sampled| {
        let index = u32::try_from(frames.len())
            .map_err(|_| PipelineError::Internal("frame index overflow".to_string()))?;
        let name = FrameSet::frame_file_name(index);
        write_jpeg(&sampled.image, &staging_dir.join(&name), DEFAULT_JPEG_QUALITY)?;
        frames.push(FrameRef {
            index,
            name,
            source_frame: sampled.source_index,
            timestamp_seconds: sampled.timestamp_seconds,
        });
        Ok(())
    })?;

    // A stream that claims frames but decodes none is corrupt, not empty
    if frames.is_empty() && probe.frame_count > 0 {
        return Err(PipelineError::UnreadableVideo(format!(
            "{}: none of {} frames could be decoded",
            video_path.display(),
            probe.frame_count
        )));
    }

    Ok((probe.fps, interval, frames))
}
