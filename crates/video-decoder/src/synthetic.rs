//! In-memory stand-in for a real decoder
//!
//! A synthetic video is a one-line text file:
//!
//! ```text
//! SYNTHETIC fps=30 frames=300 width=64 height=48
//! ```
//!
//! Frame pixels are a pure function of the frame index, so every decode of
//! the same file yields identical images. Any other file content is
//! unreadable, just like a corrupt container.

use crate::{unreadable, ProbeInfo, SampledFrame, VideoSource};
use image::{Rgb, RgbImage};
use std::path::Path;
use video_grounding_common::Result;

const MAGIC: &str = "SYNTHETIC";

/// Contents of a synthetic video file
#[must_use]
pub fn header(fps: f64, frames: u64, width: u32, height: u32) -> String {
    format!("{MAGIC} fps={fps} frames={frames} width={width} height={height}\n")
}

/// Pixels of frame `index`
#[must_use]
pub fn frame_image(index: u64, width: u32, height: u32) -> RgbImage {
    let seed = (index % 251) as u32;
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x + seed * 7) % 256) as u8,
            ((y + seed * 13) % 256) as u8,
            ((seed * 29) % 256) as u8,
        ])
    })
}

/// Decoder over synthetic video files
#[derive(Debug, Clone, Default)]
pub struct SyntheticVideoSource {
    fail_at: Option<u64>,
    undecodable: bool,
}

impl SyntheticVideoSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the stream as corrupt once decoding reaches `frame`
    #[must_use]
    pub fn failing_at(frame: u64) -> Self {
        Self {
            fail_at: Some(frame),
            undecodable: false,
        }
    }

    /// Probe succeeds but no frame ever decodes; sampling and clip reads
    /// come back empty without an error
    #[must_use]
    pub fn undecodable() -> Self {
        Self {
            fail_at: None,
            undecodable: true,
        }
    }

    fn read_header(path: &Path) -> Result<ProbeInfo> {
        let bytes = std::fs::read(path).map_err(|e| unreadable(path, e))?;
        let text = std::str::from_utf8(&bytes).map_err(|_| unreadable(path, "not a video"))?;
        let mut fields = text.split_whitespace();
        if fields.next() != Some(MAGIC) {
            return Err(unreadable(path, "not a video"));
        }

        let mut info = ProbeInfo {
            fps: 0.0,
            frame_count: 0,
            width: 0,
            height: 0,
        };
        for field in fields {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| unreadable(path, format!("malformed field {field:?}")))?;
            let bad = || unreadable(path, format!("malformed value for {key}"));
            match key {
                "fps" => info.fps = value.parse().map_err(|_| bad())?,
                "frames" => info.frame_count = value.parse().map_err(|_| bad())?,
                "width" => info.width = value.parse().map_err(|_| bad())?,
                "height" => info.height = value.parse().map_err(|_| bad())?,
                _ => {}
            }
        }
        Ok(info)
    }

    fn check_frame(&self, path: &Path, index: u64) -> Result<()> {
        match self.fail_at {
            Some(frame) if index >= frame => {
                Err(unreadable(path, format!("corrupt frame {index}")))
            }
            _ => Ok(()),
        }
    }
}

impl VideoSource for SyntheticVideoSource {
    fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        Self::read_header(path)
    }

    fn sample_frames(
        &self,
        path: &Path,
        interval: u64,
        visit: &mut dyn FnMut(SampledFrame) -> Result<()>,
    ) -> Result<u64> {
        let info = Self::read_header(path)?;
        if self.undecodable {
            return Ok(0);
        }
        let interval = interval.max(1);
        let mut emitted = 0;

        for index in (0..info.frame_count).step_by(interval as usize) {
            self.check_frame(path, index)?;
            let timestamp_seconds = if info.fps > 0.0 {
                index as f64 / info.fps
            } else {
                0.0
            };
            visit(SampledFrame {
                source_index: index,
                timestamp_seconds,
                image: frame_image(index, info.width, info.height),
            })?;
            emitted += 1;
        }
        Ok(emitted)
    }

    fn read_clip(
        &self,
        path: &Path,
        start_frame: u64,
        count: usize,
        size: u32,
    ) -> Result<Vec<RgbImage>> {
        let info = Self::read_header(path)?;
        if self.undecodable {
            return Ok(Vec::new());
        }
        let end = start_frame
            .saturating_add(count as u64)
            .min(info.frame_count);

        (start_frame..end)
            .map(|index| {
                self.check_frame(path, index)?;
                Ok(frame_image(index, size, size))
            })
            .collect()
    }
}
