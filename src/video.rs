//! Frame sources and sinks.
//!
//! File decoding and encoding use FFmpeg through `ffmpeg-next` and need the
//! `ffmpeg` feature. The in-memory source and sink are always available.

use std::io;
use std::path::PathBuf;

use image::RgbImage;
use serde::Deserialize;

#[cfg(feature = "ffmpeg")]
mod file_ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use file_ffmpeg::{FfmpegReader, FfmpegWriter};

/// Upload extensions accepted by the video endpoints.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = [".mp4", ".avi", ".mov"];

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("unsupported video format `{0}`")]
    UnsupportedFormat(String),
    #[error("cannot read video `{path}`: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("`{0}` has no video stream")]
    NoVideoStream(PathBuf),
    #[error("frame is {got:?}, stream expects {expected:?}")]
    FrameSize { expected: (u32, u32), got: (u32, u32) },
    #[error("no `{0}` encoder in this FFmpeg build")]
    EncoderUnavailable(String),
    #[error("frame written after the output was finished")]
    Finished,
    #[cfg(feature = "ffmpeg")]
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ::ffmpeg_next::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VideoError {
    /// Whether the error comes from the input file rather than from this host.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::Unreadable { .. } | Self::NoVideoStream(_)
        )
    }
}

/// Basic stream properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container frame count; absent for some formats.
    pub frame_count: Option<u64>,
}

pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next decoded frame, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), VideoError>;

    /// Flush and close the output; no frames may be written afterwards.
    fn finish(&mut self) -> Result<(), VideoError>;
}

/// Reject file names whose extension is not a supported container.
pub fn check_extension(file_name: &str) -> Result<(), VideoError> {
    let lower = file_name.to_ascii_lowercase();
    if SUPPORTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Ok(())
    } else {
        Err(VideoError::UnsupportedFormat(file_name.to_string()))
    }
}

/// Encoder settings for annotated output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// FFmpeg encoder name.
    pub codec: String,
    /// Target bits per pixel per frame; the bit rate scales with size and rate.
    pub bits_per_pixel: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "mpeg4".to_string(),
            bits_per_pixel: 0.25,
        }
    }
}

impl VideoConfig {
    pub fn bit_rate(&self, width: u32, height: u32, fps: f64) -> usize {
        (f64::from(width) * f64::from(height) * fps * self.bits_per_pixel) as usize
    }
}

/// In-memory frame source, handy for tests and synthetic input.
#[derive(Debug, Clone)]
pub struct MemorySource {
    info: VideoInfo,
    frames: std::vec::IntoIter<RgbImage>,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        Self {
            info: VideoInfo {
                width,
                height,
                fps,
                frame_count: Some(frames.len() as u64),
            },
            frames: frames.into_iter(),
        }
    }

    /// `count` black frames of the given size.
    pub fn blank(width: u32, height: u32, count: usize, fps: f64) -> Self {
        Self::new(vec![RgbImage::new(width, height); count], fps)
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        Ok(self.frames.next())
    }
}

/// Collects frames in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), VideoError> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        self.finished = true;
        Ok(())
    }
}
