//! Video decoding for the grounding pipeline
//!
//! Everything that touches container bytes goes through [`VideoSource`]:
//! - `probe` reads frame rate, frame count and dimensions (admission)
//! - `sample_frames` walks the stream emitting every Nth frame (frame sampling)
//! - `read_clip` decodes a fixed-length run of resized frames (action recognition)
//!
//! Decoding is blocking work; async callers run it under `spawn_blocking`.

pub mod ffmpeg_source;
pub mod synthetic;

use image::RgbImage;
use std::path::Path;
use video_grounding_common::{PipelineError, Result};

pub use ffmpeg_source::FfmpegVideoSource;
pub use synthetic::SyntheticVideoSource;

/// Container metadata of a video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeInfo {
    /// Average frame rate (0 when the container does not report one)
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl ProbeInfo {
    /// `frame_count / fps`, or 0 when the frame rate is unknown
    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// A frame emitted while sampling a stream
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// Position of the frame in decode order
    pub source_index: u64,
    pub timestamp_seconds: f64,
    pub image: RgbImage,
}

/// Frame-level access to a stored video
pub trait VideoSource: Send + Sync {
    /// Read stream metadata without decoding the whole file
    fn probe(&self, path: &Path) -> Result<ProbeInfo>;

    /// Decode sequentially and hand every `interval`-th frame to `visit`
    ///
    /// Frames reach `visit` in decode order. Returns the number of frames
    /// emitted. An error from `visit` stops decoding and is returned as is.
    fn sample_frames(
        &self,
        path: &Path,
        interval: u64,
        visit: &mut dyn FnMut(SampledFrame) -> Result<()>,
    ) -> Result<u64>;

    /// Decode up to `count` consecutive frames starting at `start_frame`,
    /// each resized to `size`x`size`
    ///
    /// Fewer than `count` frames come back when the stream ends first.
    fn read_clip(
        &self,
        path: &Path,
        start_frame: u64,
        count: usize,
        size: u32,
    ) -> Result<Vec<RgbImage>>;
}

pub(crate) fn unreadable(path: &Path, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::UnreadableVideo(format!("{}: {reason}", path.display()))
}
