//! Video files through FFmpeg.
//!
//! Frames keep the size the decoder reports, so rotation metadata never
//! changes the buffer layout.

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::encoder::video::Encoder as VideoEncoder;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, Flags};
use ffmpeg::{Rational, codec, format, frame};
use image::RgbImage;

use super::{FrameSink, FrameSource, VideoConfig, VideoError, VideoInfo};

const FALLBACK_FPS: f64 = 30.0;

fn init() -> Result<(), VideoError> {
    ffmpeg::init()?;
    // Decoder chatter goes nowhere useful in a server log.
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}

fn unreadable(path: &Path, error: ffmpeg::Error) -> VideoError {
    VideoError::Unreadable {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

/// Decodes the best video stream of a file into RGB frames.
pub struct FfmpegReader {
    input: format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<scaling::Context>,
    info: VideoInfo,
    flushed: bool,
}

impl FfmpegReader {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        init()?;
        let input = format::input(path).map_err(|e| unreadable(path, e))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| VideoError::NoVideoStream(path.to_path_buf()))?;
        let stream_index = stream.index();

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| unreadable(path, e))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(VideoError::Unreadable {
                path: path.to_path_buf(),
                reason: "zero-sized video stream".to_string(),
            });
        }

        let fps = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .map(f64::from)
            .find(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FPS);
        let info = VideoInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count: u64::try_from(stream.frames()).ok().filter(|&n| n > 0),
        };
        tracing::debug!(?info, path = %path.display(), "opened video");

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler: None,
            info,
            flushed: false,
        })
    }

    fn to_rgb(&mut self, decoded: &frame::Video) -> Result<RgbImage, VideoError> {
        let (format, width, height) = (decoded.format(), decoded.width(), decoded.height());
        let stale = self.scaler.as_ref().is_none_or(|scaler| {
            let input = scaler.input();
            input.format != format || input.width != width || input.height != height
        });
        let scaler = match &mut self.scaler {
            Some(scaler) if !stale => scaler,
            slot => slot.insert(scaling::Context::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                Flags::BILINEAR,
            )?),
        };

        let mut rgb = frame::Video::empty();
        scaler.run(decoded, &mut rgb)?;
        let pixels = frame_to_pixels(&rgb)?;
        RgbImage::from_raw(width, height, pixels).ok_or(VideoError::FrameSize {
            expected: (width, height),
            got: (rgb.width(), rgb.height()),
        })
    }
}

/// Copy plane 0 of a packed RGB24 frame, dropping row padding.
fn frame_to_pixels(frame: &frame::Video) -> Result<Vec<u8>, VideoError> {
    let row_bytes = frame.width() as usize * 3;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok(data[..row_bytes * height].to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or(VideoError::FrameSize {
                expected: (frame.width(), frame.height()),
                got: ((stride / 3) as u32, row as u32),
            })?;
        pixels.extend_from_slice(line);
    }
    Ok(pixels)
}

impl FrameSource for FfmpegReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let mut decoded = frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_rgb(&decoded).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                    }
                }
                None => {
                    // Drain the frames the decoder still holds.
                    self.decoder.send_eof()?;
                    self.flushed = true;
                }
            }
        }
    }
}

/// Encodes RGB frames into a video file, YUV 4:2:0 with the configured encoder.
pub struct FfmpegWriter {
    output: format::context::Output,
    encoder: VideoEncoder,
    scaler: scaling::Context,
    stream_index: usize,
    time_base: Rational,
    size: (u32, u32),
    next_pts: i64,
    finished: bool,
}

impl FfmpegWriter {
    pub fn create(
        config: &VideoConfig,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, VideoError> {
        init()?;
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { FALLBACK_FPS };
        let frame_rate = Rational::new((fps * 1000.0).round() as i32, 1000).reduce();
        let time_base = frame_rate.invert();

        let mut output = format::output(path)?;
        let encoder_codec = ffmpeg::encoder::find_by_name(&config.codec)
            .ok_or_else(|| VideoError::EncoderUnavailable(config.codec.clone()))?;

        let mut encoder = codec::context::Context::new_with_codec(encoder_codec)
            .encoder()
            .video()?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_bit_rate(config.bit_rate(width, height, fps));
        if output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER)
        {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(encoder_codec)?;

        let stream_index = {
            let mut stream = output.add_stream(encoder_codec)?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        output.write_header()?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )?;
        tracing::debug!(path = %path.display(), codec = %config.codec, width, height, fps, "writing video");

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            time_base,
            size: (width, height),
            next_pts: 0,
            finished: false,
        })
    }

    /// Write every packet the encoder has ready.
    fn drain(&mut self) -> Result<(), VideoError> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(self.time_base);
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet.write_interleaved(&mut self.output)?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), VideoError> {
        if self.finished {
            return Err(VideoError::Finished);
        }
        if image.dimensions() != self.size {
            return Err(VideoError::FrameSize {
                expected: self.size,
                got: image.dimensions(),
            });
        }

        let (width, height) = self.size;
        let mut rgb = frame::Video::new(Pixel::RGB24, width, height);
        let row_bytes = width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, line) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            data[row * stride..row * stride + row_bytes].copy_from_slice(line);
        }

        let mut yuv = frame::Video::empty();
        self.scaler.run(&rgb, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder.send_frame(&yuv)?;
        self.drain()
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof()?;
        self.drain()?;
        self.output.write_trailer()?;
        Ok(())
    }
}
