//! Video assets and frame sets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix shared by every extracted frame file name
pub const FRAME_FILE_PREFIX: &str = "frame_";

/// Accepted container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Avi,
    Mov,
}

impl VideoFormat {
    /// Resolve the format from a declared file name (extension only, case-insensitive)
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            _ => None,
        }
    }

    /// Canonical file extension (without dot)
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// An admitted video. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAsset {
    /// Opaque stable identifier
    pub id: String,
    /// File name declared by the uploader
    pub original_name: String,
    /// Locator of the stored source, relative to the asset store root
    pub stored_path: String,
    /// Probed duration (0 when the probe could not determine it)
    pub duration_seconds: f64,
    pub format: VideoFormat,
    /// Probed average frame rate (0 when unknown)
    pub frame_rate: f64,
    pub created_at: DateTime<Utc>,
}

/// One extracted still frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Dense index within the frame set, starting at 0
    pub index: u32,
    /// File name within the frame set directory
    pub name: String,
    /// Index of the frame in the decoded source stream
    pub source_frame: u64,
    pub timestamp_seconds: f64,
}

/// Ordered frames sampled from a video at a fixed temporal rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSet {
    pub video_id: String,
    pub sample_rate_seconds: f64,
    /// Source frame rate the interval was derived from
    pub source_fps: f64,
    /// Every `interval`-th source frame was emitted
    pub interval: u64,
    pub frames: Vec<FrameRef>,
}

impl FrameSet {
    /// File name for the frame at `index`
    #[must_use]
    pub fn frame_file_name(index: u32) -> String {
        format!("{FRAME_FILE_PREFIX}{index:04}.jpg")
    }

    /// Source-frame interval for a sample rate: `round(fps * rate)`, never below 1
    #[must_use]
    pub fn interval_for(source_fps: f64, sample_rate_seconds: f64) -> u64 {
        let interval = (source_fps * sample_rate_seconds).round();
        if interval.is_finite() && interval >= 1.0 {
            interval as u64
        } else {
            1
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Indices are dense from 0 and strictly ordered
    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.frames
            .iter()
            .enumerate()
            .all(|(i, frame)| frame.index as usize == i)
    }
}
