//! Streaming constant-frame-rate encoder.
//!
//! [`CfrWriter`] accepts RGB frames one at a time and muxes them into a video
//! container through FFmpeg, so a conversion never holds more than one raster
//! in memory. The encoder opens lazily on the first frame, whose dimensions
//! (rounded up to even values for 4:2:0 chroma) fix the output size; later
//! frames of a different size are resized to match.
//!
//! # Example
//!
//! ```no_run
//! use image::RgbImage;
//! use mcap_video::{CfrWriter, VideoEncoderOptions};
//!
//! let mut writer = CfrWriter::create("output.mp4", 10.0, &VideoEncoderOptions::default())?;
//! for shade in 0..20u8 {
//!     writer.push(&RgbImage::from_pixel(64, 48, image::Rgb([shade * 10, 0, 0])))?;
//! }
//! let written = writer.finish()?;
//! assert_eq!(written, 20);
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Dictionary, Packet, Rational};
use image::RgbImage;
use image::imageops::{self, FilterType};

use crate::error::ConvertError;

/// Relative distance from the 1/1001 grid still treated as on it.
const GRID_TOLERANCE: f64 = 1e-9;

/// Options shared by the in-process CFR encoder and the VFR encoder
/// subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderOptions {
    /// Codec to use. Default is H.264.
    pub codec: VideoCodec,
    /// Constant Rate Factor (0-51, lower is better). Ignored by codecs
    /// without CRF support.
    pub crf: Option<u32>,
    /// Bitrate in bits per second. If set, overrides CRF for the CFR path.
    pub bitrate: Option<usize>,
}

impl Default for VideoEncoderOptions {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            crf: None,
            bitrate: None,
        }
    }
}

impl VideoEncoderOptions {
    /// Set the codec.
    #[must_use]
    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the CRF quality value.
    #[must_use]
    pub fn crf(mut self, crf: u32) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bitrate(mut self, bitrate: usize) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// CRF value to hand to the encoder, if the codec honors one.
    pub(crate) fn effective_crf(&self) -> Option<u32> {
        self.crf.filter(|_| self.codec.supports_crf())
    }
}

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
    /// MPEG-4 Part 2.
    Mpeg4,
}

impl VideoCodec {
    fn to_codec_id(self) -> Id {
        match self {
            VideoCodec::H264 => Id::H264,
            VideoCodec::H265 => Id::HEVC,
            VideoCodec::Mpeg4 => Id::MPEG4,
        }
    }

    /// Encoder name as accepted by `ffmpeg -c:v`.
    pub fn encoder_name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Mpeg4 => "mpeg4",
        }
    }

    fn supports_crf(self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "libx264" => Ok(VideoCodec::H264),
            "h265" | "hevc" | "libx265" => Ok(VideoCodec::H265),
            "mpeg4" => Ok(VideoCodec::Mpeg4),
            other => Err(format!("unknown codec `{other}` (expected h264, h265 or mpeg4)")),
        }
    }
}

/// Convert a frames-per-second value to an FFmpeg rational.
///
/// Rates on the 1/1001 grid are snapped to it so NTSC-style rates stay exact
/// and integral rates reduce to `n/1`. Any other rate, including very slow
/// ones, is approximated by `av_d2q`.
pub fn frame_rate_rational(frames_per_second: f64) -> Result<Rational, ConvertError> {
    if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
        return Err(ConvertError::VideoEncode(format!(
            "frame rate {frames_per_second} cannot be encoded"
        )));
    }

    let scaled = frames_per_second * 1001.0;
    let snapped = scaled.round();
    if snapped >= 1.0
        && snapped <= f64::from(i32::MAX)
        && (scaled - snapped).abs() <= GRID_TOLERANCE * snapped
    {
        return Ok(Rational::new(snapped as i32, 1001).reduce());
    }

    let rate = Rational::from(frames_per_second);
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return Err(ConvertError::VideoEncode(format!(
            "frame rate {frames_per_second} cannot be encoded"
        )));
    }
    Ok(rate)
}

fn even(value: u32) -> u32 {
    value + value % 2
}

/// Writes frames at a fixed rate to a video file.
pub struct CfrWriter {
    path: PathBuf,
    frame_rate: Rational,
    options: VideoEncoderOptions,
    session: Option<EncoderSession>,
    frames_written: u64,
}

impl Debug for CfrWriter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CfrWriter")
            .field("path", &self.path)
            .field("frame_rate", &self.frame_rate)
            .field("options", &self.options)
            .field("opened", &self.session.is_some())
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

struct EncoderSession {
    output: Output,
    encoder: ffmpeg_next::encoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl CfrWriter {
    /// Prepare a writer for `path` at `frames_per_second`.
    ///
    /// Nothing is written until the first [`push`](Self::push).
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::VideoEncode`] if the rate is not positive and
    /// finite, or [`ConvertError::Ffmpeg`] if FFmpeg fails to initialize.
    pub fn create<P: AsRef<Path>>(
        path: P,
        frames_per_second: f64,
        options: &VideoEncoderOptions,
    ) -> Result<Self, ConvertError> {
        crate::ffmpeg::initialize()?;
        let frame_rate = frame_rate_rational(frames_per_second)?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            frame_rate,
            options: options.clone(),
            session: None,
            frames_written: 0,
        })
    }

    /// Frames encoded so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Encode one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::VideoEncode`] if the codec cannot be opened
    /// or rejects the frame, and [`ConvertError::VideoWrite`] on muxing
    /// failure.
    pub fn push(&mut self, frame: &RgbImage) -> Result<(), ConvertError> {
        if self.session.is_none() {
            let session = EncoderSession::open(&self.path, self.frame_rate, &self.options, frame)?;
            self.session = Some(session);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(ConvertError::VideoEncode("encoder not open".to_string()));
        };
        session.encode(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Flush the encoder and write the container trailer.
    ///
    /// Returns the number of frames written.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::VideoWrite`] if no frame was pushed or the
    /// trailer cannot be written.
    pub fn finish(mut self) -> Result<u64, ConvertError> {
        let Some(mut session) = self.session.take() else {
            return Err(ConvertError::VideoWrite("no frames to write".to_string()));
        };
        session.finish()?;
        log::info!(
            "Finished {} ({} frames at {} fps)",
            self.path.display(),
            self.frames_written,
            self.frame_rate
        );
        Ok(self.frames_written)
    }
}

impl EncoderSession {
    fn open(
        path: &Path,
        frame_rate: Rational,
        options: &VideoEncoderOptions,
        first: &RgbImage,
    ) -> Result<Self, ConvertError> {
        let width = even(first.width());
        let height = even(first.height());
        log::info!(
            "Opening {} (codec={:?}, {}x{}, {} fps)",
            path.display(),
            options.codec,
            width,
            height,
            frame_rate
        );

        let mut output = ffmpeg_next::format::output(path)
            .map_err(|e| ConvertError::VideoWrite(format!("cannot open output: {e}")))?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let codec_id = options.codec.to_codec_id();
        let codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            ConvertError::VideoEncode(format!("codec {codec_id:?} not available"))
        })?;

        let mut stream = output
            .add_stream(codec)
            .map_err(|e| ConvertError::VideoWrite(format!("cannot add stream: {e}")))?;
        let stream_index = stream.index();
        let encoder_time_base = frame_rate.invert();

        let mut encoder = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| ConvertError::VideoEncode(format!("cannot create codec context: {e}")))?
            .encoder()
            .video()
            .map_err(|e| ConvertError::VideoEncode(format!("cannot open video encoder: {e}")))?;

        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        if let Some(bitrate) = options.bitrate {
            encoder.set_bit_rate(bitrate);
        }
        if needs_global_header {
            // SAFETY: the context is valid and not yet opened.
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let mut codec_options = Dictionary::new();
        if options.bitrate.is_none() {
            if let Some(crf) = options.effective_crf() {
                codec_options.set("crf", &crf.to_string());
            }
        }
        let encoder = encoder
            .open_as_with(codec, codec_options)
            .map_err(|e| ConvertError::VideoEncode(format!("cannot open encoder: {e}")))?;
        stream.set_time_base(encoder_time_base);
        stream.set_parameters(&encoder);

        output
            .write_header()
            .map_err(|e| ConvertError::VideoWrite(format!("cannot write header: {e}")))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| ConvertError::VideoWrite("output stream disappeared".to_string()))?;

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| ConvertError::VideoWrite(format!("cannot create scaler: {e}")))?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    fn encode(&mut self, frame: &RgbImage) -> Result<(), ConvertError> {
        let resized;
        let rgb = if frame.width() != self.width || frame.height() != self.height {
            resized = imageops::resize(frame, self.width, self.height, FilterType::Lanczos3);
            &resized
        } else {
            frame
        };

        let mut source = VideoFrame::new(Pixel::RGB24, self.width, self.height);
        let stride = source.stride(0);
        let row_len = self.width as usize * 3;
        let plane = source.data_mut(0);
        for (y, row) in rgb.as_raw().chunks_exact(row_len).enumerate() {
            let start = y * stride;
            plane[start..start + row_len].copy_from_slice(row);
        }

        let mut converted = VideoFrame::empty();
        self.scaler
            .run(&source, &mut converted)
            .map_err(|e| ConvertError::VideoWrite(format!("scaling failed: {e}")))?;
        converted.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&converted)
            .map_err(|e| ConvertError::VideoEncode(format!("send_frame failed: {e}")))?;
        self.drain()
    }

    fn drain(&mut self) -> Result<(), ConvertError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| ConvertError::VideoWrite(format!("write packet failed: {e}")))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ConvertError> {
        self.encoder
            .send_eof()
            .map_err(|e| ConvertError::VideoEncode(format!("send_eof failed: {e}")))?;
        self.drain()?;
        self.output
            .write_trailer()
            .map_err(|e| ConvertError::VideoWrite(format!("cannot write trailer: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_rates_reduce() {
        let rate = frame_rate_rational(10.0).unwrap();
        assert_eq!((rate.numerator(), rate.denominator()), (10, 1));
    }

    #[test]
    fn ntsc_rate_is_exact() {
        let rate = frame_rate_rational(30000.0 / 1001.0).unwrap();
        assert_eq!((rate.numerator(), rate.denominator()), (30000, 1001));
    }

    #[test]
    fn off_grid_rates_are_approximated() {
        let rate = frame_rate_rational(12.3456).unwrap();
        assert!((f64::from(rate) - 12.3456).abs() < 1e-6);
    }

    #[test]
    fn hourly_rate_is_not_rounded_to_zero() {
        let rate = frame_rate_rational(1.0 / 3600.0).unwrap();
        assert!(rate.numerator() > 0);
        assert!((f64::from(rate) * 3600.0 - 1.0).abs() < 1e-6, "{rate}");
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(frame_rate_rational(0.0).is_err());
        assert!(frame_rate_rational(-5.0).is_err());
        assert!(frame_rate_rational(f64::NAN).is_err());
        assert!(frame_rate_rational(f64::INFINITY).is_err());
    }

    #[test]
    fn odd_dimensions_round_up() {
        assert_eq!(even(63), 64);
        assert_eq!(even(48), 48);
        assert_eq!(even(1), 2);
    }

    #[test]
    fn codec_names_parse() {
        assert_eq!("H264".parse::<VideoCodec>(), Ok(VideoCodec::H264));
        assert_eq!("hevc".parse::<VideoCodec>(), Ok(VideoCodec::H265));
        assert!("vp9".parse::<VideoCodec>().is_err());
    }

    #[test]
    fn crf_only_for_supporting_codecs() {
        let options = VideoEncoderOptions::default().crf(20);
        assert_eq!(options.effective_crf(), Some(20));
        assert_eq!(options.codec(VideoCodec::Mpeg4).effective_crf(), None);
    }
}
