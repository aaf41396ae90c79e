//! Inspection of produced videos.
//!
//! [`probe_video`] reads stream metadata; [`decode_video`] additionally
//! decodes every frame to RGB together with its presentation time. Both are
//! used to verify conversion output and by the CLI's `--verbose` summary.
//!
//! # Example
//!
//! ```no_run
//! let info = mcap_video::probe_video("output.mp4")?;
//! println!("{}x{} @ {:.2} fps ({})", info.width, info.height, info.frames_per_second, info.codec);
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{path::Path, time::Duration};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type as MediaType,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::RgbImage;

use crate::error::ConvertError;

/// Metadata of the first video stream of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate reported by the container, 0.0 if unknown.
    pub frames_per_second: f64,
    /// Container duration, if known.
    pub duration: Option<Duration>,
    pub codec: String,
}

/// Every frame of a video, decoded to RGB.
#[derive(Debug, Clone)]
pub struct DecodedVideo {
    pub info: VideoInfo,
    pub frames: Vec<RgbImage>,
    /// Presentation time of each frame in seconds.
    pub timestamps: Vec<f64>,
}

struct OpenedVideo {
    input: Input,
    decoder: VideoDecoder,
    stream_index: usize,
    time_base: Rational,
    info: VideoInfo,
}

fn open_video(path: &Path) -> Result<OpenedVideo, ConvertError> {
    crate::ffmpeg::initialize()?;
    let input = ffmpeg_next::format::input(&path)
        .map_err(|e| ConvertError::VideoDecode(format!("cannot open {}: {e}", path.display())))?;

    let stream = input
        .streams()
        .best(MediaType::Video)
        .ok_or_else(|| ConvertError::VideoDecode(format!("{} has no video stream", path.display())))?;
    let stream_index = stream.index();
    let time_base = stream.time_base();

    let decoder = CodecContext::from_parameters(stream.parameters())?
        .decoder()
        .video()?;

    let rate = stream.avg_frame_rate();
    let frames_per_second = if rate.denominator() != 0 {
        f64::from(rate.numerator()) / f64::from(rate.denominator())
    } else {
        0.0
    };
    let duration = u64::try_from(input.duration())
        .ok()
        .filter(|&micros| micros > 0)
        .map(Duration::from_micros);
    let codec = decoder
        .codec()
        .map(|codec| codec.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let info = VideoInfo {
        width: decoder.width(),
        height: decoder.height(),
        frames_per_second,
        duration,
        codec,
    };
    Ok(OpenedVideo {
        input,
        decoder,
        stream_index,
        time_base,
        info,
    })
}

/// Read the metadata of the first video stream.
///
/// # Errors
///
/// Returns [`ConvertError::VideoDecode`] if the file cannot be opened or
/// has no video stream.
pub fn probe_video<P: AsRef<Path>>(path: P) -> Result<VideoInfo, ConvertError> {
    Ok(open_video(path.as_ref())?.info)
}

/// Decode every frame of the first video stream.
///
/// # Errors
///
/// Returns [`ConvertError::VideoDecode`] or [`ConvertError::Ffmpeg`] on
/// decoding failure.
pub fn decode_video<P: AsRef<Path>>(path: P) -> Result<DecodedVideo, ConvertError> {
    let OpenedVideo {
        mut input,
        mut decoder,
        stream_index,
        time_base,
        info,
    } = open_video(path.as_ref())?;

    let mut scaler = ScalingContext::get(
        decoder.format(),
        info.width,
        info.height,
        Pixel::RGB24,
        info.width,
        info.height,
        ScalingFlags::BILINEAR,
    )?;

    let mut frames = Vec::new();
    let mut timestamps = Vec::new();
    let mut decoded = VideoFrame::empty();
    let mut receive = |decoder: &mut VideoDecoder| -> Result<(), ConvertError> {
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb = VideoFrame::empty();
            scaler.run(&decoded, &mut rgb)?;
            frames.push(frame_to_rgb(&rgb, info.width, info.height)?);
            let pts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            timestamps.push(pts as f64 * f64::from(time_base));
        }
        Ok(())
    };

    loop {
        let mut packet = Packet::empty();
        match packet.read(&mut input) {
            Ok(()) => {
                if packet.stream() == stream_index {
                    decoder.send_packet(&packet)?;
                    receive(&mut decoder)?;
                }
            }
            Err(FfmpegError::Eof) => break,
            Err(error) => return Err(ConvertError::from(error)),
        }
    }
    decoder.send_eof()?;
    receive(&mut decoder)?;

    Ok(DecodedVideo {
        info,
        frames,
        timestamps,
    })
}

fn frame_to_rgb(frame: &VideoFrame, width: u32, height: u32) -> Result<RgbImage, ConvertError> {
    let stride = frame.stride(0);
    let row_len = width as usize * 3;
    let data = frame.data(0);
    let mut buffer = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        buffer.extend_from_slice(&data[start..start + row_len]);
    }
    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        ConvertError::VideoDecode("decoded frame does not match stream dimensions".to_string())
    })
}
