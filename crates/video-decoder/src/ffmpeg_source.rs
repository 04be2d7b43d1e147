//! `FFmpeg`-backed [`VideoSource`]

use crate::{unreadable, ProbeInfo, SampledFrame, VideoSource};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use video_grounding_common::{PipelineError, Result};

/// Initialize `FFmpeg` once per process
fn init_ffmpeg() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| PipelineError::Internal(format!("Failed to initialize FFmpeg: {e}")))
}

/// Decodes containers with libavformat/libavcodec (multi-threaded software decode)
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegVideoSource;

impl FfmpegVideoSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn frame_rate(stream: &ffmpeg::format::stream::Stream) -> f64 {
    let rate = stream.avg_frame_rate();
    if rate.numerator() > 0 && rate.denominator() > 0 {
        f64::from(rate.numerator()) / f64::from(rate.denominator())
    } else {
        0.0
    }
}

/// Maps presentation timestamps of one stream to frame numbers
#[derive(Debug, Clone, Copy)]
struct Timeline {
    fps: f64,
    /// Seconds per timestamp tick
    time_base: f64,
    start_pts: i64,
}

impl Timeline {
    fn of(stream: &ffmpeg::format::stream::Stream) -> Self {
        let start = stream.start_time();
        Self {
            fps: frame_rate(stream),
            time_base: f64::from(stream.time_base()),
            start_pts: if start == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { start },
        }
    }

    /// Frame number of a decoded frame, if it carries a timestamp
    fn index_of(&self, frame: &ffmpeg::util::frame::video::Video) -> Option<u64> {
        if self.fps <= 0.0 || self.time_base <= 0.0 {
            return None;
        }
        let pts = frame.timestamp().or_else(|| frame.pts())?;
        let seconds = (pts - self.start_pts) as f64 * self.time_base;
        Some((seconds * self.fps).round().max(0.0) as u64)
    }
}

/// An opened input with a video decoder attached to its best video stream
struct Decoding {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::codec::decoder::Video,
    stream_index: usize,
    timeline: Timeline,
}

impl Decoding {
    fn open(path: &Path) -> Result<Self> {
        init_ffmpeg()?;
        let input = ffmpeg::format::input(&path).map_err(|e| unreadable(path, e))?;

        let (decoder, stream_index, timeline) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| unreadable(path, "no video stream"))?;
            let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| unreadable(path, format!("failed to create context: {e}")))?
                .decoder()
                .video()
                .map_err(|e| unreadable(path, format!("failed to create decoder: {e}")))?;
            (decoder, stream.index(), Timeline::of(&stream))
        };

        Ok(Self {
            path: path.to_path_buf(),
            input,
            decoder,
            stream_index,
            timeline,
        })
    }

    /// Seek to the keyframe at or before `frame`; false leaves the input at
    /// its current position
    fn seek_to_frame(&mut self, frame: u64) -> bool {
        if self.timeline.fps <= 0.0 {
            return false;
        }
        let seconds = frame as f64 / self.timeline.fps;
        let target = (seconds * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        match self.input.seek(target, ..target) {
            Ok(()) => {
                self.decoder.flush();
                true
            }
            Err(e) => {
                debug!("Seek to frame {} in {:?} failed: {}", frame, self.path, e);
                false
            }
        }
    }

    /// RGB24 scaler from the decoder's native format to `width`x`height`
    fn scaler(&self, width: u32, height: u32) -> Result<ffmpeg::software::scaling::Context> {
        ffmpeg::software::scaling::Context::get(
            self.decoder.format(),
            self.decoder.width(),
            self.decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| PipelineError::Internal(format!("Failed to create scaler: {e}")))
    }

    /// Feed every decoded frame, numbered in decode order, to `on_frame`
    ///
    /// Packets the decoder rejects are skipped. If every packet was rejected
    /// the stream is unreadable.
    fn for_each_frame(
        &mut self,
        mut on_frame: impl FnMut(u64, &ffmpeg::util::frame::video::Video) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut index = 0u64;
        let mut rejected = 0u64;
        let mut decoded = ffmpeg::util::frame::video::Video::empty();

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                debug!("Skipping undecodable packet: {}", e);
                rejected += 1;
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if on_frame(index, &decoded)?.is_break() {
                    return Ok(());
                }
                index += 1;
            }
        }

        // Flush frames still buffered in the decoder
        self.decoder.send_eof().ok();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            if on_frame(index, &decoded)?.is_break() {
                return Ok(());
            }
            index += 1;
        }

        if rejected > 0 {
            if index == 0 {
                return Err(unreadable(
                    &self.path,
                    format!("{rejected} packets failed to decode, no frame produced"),
                ));
            }
            warn!("Skipped {} undecodable packets in {:?}", rejected, self.path);
        }
        Ok(())
    }
}

/// Collect `count` frames starting at `start_frame`
///
/// After a seek, positions come from frame timestamps; `None` means a frame
/// without one was met and the position is unknown.
fn decode_clip(
    decoding: &mut Decoding,
    start_frame: u64,
    count: usize,
    size: u32,
    seeked: bool,
) -> Result<Option<Vec<RgbImage>>> {
    let mut scaler = decoding.scaler(size, size)?;
    let timeline = decoding.timeline;
    let mut clip = Vec::with_capacity(count);
    let mut lost = false;

    decoding.for_each_frame(|index, frame| {
        let position = if seeked {
            match timeline.index_of(frame) {
                Some(position) => position,
                None => {
                    lost = true;
                    return Ok(ControlFlow::Break(()));
                }
            }
        } else {
            index
        };
        if position < start_frame {
            return Ok(ControlFlow::Continue(()));
        }
        clip.push(convert(&mut scaler, frame)?);
        Ok(if clip.len() >= count {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    })?;

    Ok((!lost).then_some(clip))
}

/// Scale a decoded frame and copy it into a tightly packed RGB image
fn convert(
    scaler: &mut ffmpeg::software::scaling::Context,
    frame: &ffmpeg::util::frame::video::Video,
) -> Result<RgbImage> {
    let mut converted = ffmpeg::util::frame::video::Video::empty();
    scaler
        .run(frame, &mut converted)
        .map_err(|e| PipelineError::Internal(format!("Failed to convert frame: {e}")))?;

    let width = converted.width();
    let height = converted.height();
    let stride = converted.stride(0);
    let plane = converted.data(0);
    let row_bytes = width as usize * 3;

    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        data.extend_from_slice(&plane[start..start + row_bytes]);
    }

    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| PipelineError::Internal("decoded frame has unexpected size".to_string()))
}

impl VideoSource for FfmpegVideoSource {
    fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        init_ffmpeg()?;
        let input = ffmpeg::format::input(&path).map_err(|e| unreadable(path, e))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| unreadable(path, "no video stream"))?;

        let fps = frame_rate(&stream);
        let frame_count = match stream.frames() {
            n if n > 0 => n as u64,
            // Some containers do not store a frame count; estimate from duration
            _ => {
                let seconds = input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
                (seconds * fps).round().max(0.0) as u64
            }
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| unreadable(path, format!("failed to create context: {e}")))?
            .decoder()
            .video()
            .map_err(|e| unreadable(path, format!("failed to create decoder: {e}")))?;

        let info = ProbeInfo {
            fps,
            frame_count,
            width: decoder.width(),
            height: decoder.height(),
        };
        debug!("Probed {:?}: {:?}", path, info);
        Ok(info)
    }

    fn sample_frames(
        &self,
        path: &Path,
        interval: u64,
        visit: &mut dyn FnMut(SampledFrame) -> Result<()>,
    ) -> Result<u64> {
        let interval = interval.max(1);
        let mut decoding = Decoding::open(path)?;
        let mut scaler = decoding.scaler(decoding.decoder.width(), decoding.decoder.height())?;
        let fps = decoding.timeline.fps;
        let mut emitted = 0u64;

        decoding.for_each_frame(|index, frame| {
            if index % interval == 0 {
                let image = convert(&mut scaler, frame)?;
                let timestamp_seconds = if fps > 0.0 { index as f64 / fps } else { 0.0 };
                visit(SampledFrame {
                    source_index: index,
                    timestamp_seconds,
                    image,
                })?;
                emitted += 1;
            }
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(emitted)
    }

    fn read_clip(
        &self,
        path: &Path,
        start_frame: u64,
        count: usize,
        size: u32,
    ) -> Result<Vec<RgbImage>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut decoding = Decoding::open(path)?;
        if start_frame > 0 && decoding.seek_to_frame(start_frame) {
            if let Some(clip) = decode_clip(&mut decoding, start_frame, count, size, true)? {
                return Ok(clip);
            }
            debug!("No frame timestamps in {:?}, decoding clip from the start", path);
            decoding = Decoding::open(path)?;
        }

        Ok(decode_clip(&mut decoding, start_frame, count, size, false)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        assert!(init_ffmpeg().is_ok());
    }

    #[test]
    fn test_probe_rejects_non_video_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, b"this is a text file, not a container").unwrap();

        let result = FfmpegVideoSource::new().probe(&path);
        assert!(matches!(result, Err(PipelineError::UnreadableVideo(_))));
    }

    fn frame_with_pts(pts: Option<i64>) -> ffmpeg::util::frame::video::Video {
        let mut frame = ffmpeg::util::frame::video::Video::new(ffmpeg::format::Pixel::RGB24, 2, 2);
        frame.set_pts(pts);
        frame
    }

    #[test]
    fn test_timeline_maps_timestamps_to_frames() {
        // 30 fps in a 1/15360 time base, stream starting at tick 1024
        let timeline = Timeline {
            fps: 30.0,
            time_base: 1.0 / 15360.0,
            start_pts: 1024,
        };
        assert_eq!(timeline.index_of(&frame_with_pts(Some(1024))), Some(0));
        assert_eq!(timeline.index_of(&frame_with_pts(Some(1024 + 512 * 90))), Some(90));
        assert_eq!(timeline.index_of(&frame_with_pts(None)), None);

        let unknown_rate = Timeline { fps: 0.0, ..timeline };
        assert_eq!(unknown_rate.index_of(&frame_with_pts(Some(2048))), None);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let result = FfmpegVideoSource::new().sample_frames(
            Path::new("/nonexistent/video.mp4"),
            30,
            &mut |_| Ok(()),
        );
        assert!(matches!(result, Err(PipelineError::UnreadableVideo(_))));
    }
}
