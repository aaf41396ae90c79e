//! Error types for the `mcap-video` crate.
//!
//! This module defines [`ConvertError`], the unified error type returned by
//! all fallible operations in the crate. Variants are grouped by where in a
//! conversion they arise: opening and scanning the log, planning frame
//! timing, decoding individual frames, and driving the video encoder.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use mcap::McapError;
use thiserror::Error;

/// The unified error type for all `mcap-video` operations.
///
/// Every public function that can fail returns `Result<T, ConvertError>`.
/// Variants carry enough context to report the problem to a user without
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConvertError {
    /// The log file could not be opened or memory-mapped.
    #[error("Failed to open log file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::McapLog::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The MCAP container is malformed.
    #[error("MCAP error: {0}")]
    Mcap(String),

    /// A ROS 2 message definition embedded in a schema could not be parsed.
    #[error("Invalid message definition: {0}")]
    MessageDefinition(String),

    /// A CDR payload could not be decoded against its message definition.
    #[error("Failed to decode CDR payload: {0}")]
    Cdr(String),

    /// The requested topic carries no image messages.
    #[error("No image data found on topic {topic}")]
    NoFrames {
        /// The topic that was scanned.
        topic: String,
    },

    /// Fewer than two frames were found, so no timing can be derived.
    #[error("Image data too short: found {found} frame(s), at least 2 are required")]
    InsufficientFrames {
        /// Number of frames that were found.
        found: usize,
    },

    /// The frame timestamps do not define a usable frame rate.
    #[error("Degenerate frame timing: {0}")]
    DegenerateTiming(String),

    /// A single frame could not be turned into a raster.
    ///
    /// The converter absorbs this error: the frame is skipped with a warning.
    #[error("Failed to decode frame: {0}")]
    FrameDecode(String),

    /// The frame list and the duration list handed to the VFR encoder differ
    /// in length.
    #[error("Frame and duration counts do not match ({frames} frames, {durations} durations)")]
    FrameCountMismatch {
        /// Number of frame files.
        frames: usize,
        /// Number of durations.
        durations: usize,
    },

    /// The user declined to continue after a low-memory warning.
    #[error("Conversion aborted by user")]
    AbortedByUser,

    /// The external encoder executable could not be found.
    #[error("Encoder not available: {0} command was not found")]
    EncoderUnavailable(String),

    /// The external encoder exited with a non-zero status.
    #[error("ffmpeg failed: {0}")]
    EncoderFailed(String),

    /// The in-process video encoder could not be configured or fed.
    #[error("Video encoding error: {0}")]
    VideoEncode(String),

    /// The output container could not be written.
    #[error("Video write error: {0}")]
    VideoWrite(String),

    /// The produced video could not be probed.
    #[error("Failed to decode video: {0}")]
    VideoDecode(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while decoding or saving a frame.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),

    /// [`crate::Converter::run`] was called on a converter that already ran.
    #[error("Converter cannot run from state {0:?}")]
    InvalidState(crate::converter::ConversionState),
}

impl From<FfmpegError> for ConvertError {
    fn from(error: FfmpegError) -> Self {
        ConvertError::Ffmpeg(error.to_string())
    }
}

impl From<McapError> for ConvertError {
    fn from(error: McapError) -> Self {
        ConvertError::Mcap(error.to_string())
    }
}
