//! # mcap-video
//!
//! Convert ROS 2 image topics recorded in MCAP logs into video files.
//!
//! `mcap-video` reads `sensor_msgs/msg/Image` and
//! `sensor_msgs/msg/CompressedImage` messages straight from a memory-mapped
//! MCAP file, decodes their CDR payloads, and encodes the frames into a
//! single video track through FFmpeg. Logs of any size convert in bounded
//! memory: a first pass collects timestamps only, a second pass decodes and
//! emits one frame at a time.
//!
//! ## Quick Start
//!
//! ### List image topics
//!
//! ```no_run
//! for topic in mcap_video::list_image_topics("recording.mcap")? {
//!     println!("{topic}");
//! }
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```
//!
//! ### Constant frame rate
//!
//! The rate is the inverse of the mean interval between log receipt times.
//!
//! ```no_run
//! use mcap_video::ConvertOptions;
//!
//! let report = mcap_video::convert(
//!     "recording.mcap",
//!     "/camera/image_raw",
//!     "camera.mp4",
//!     &ConvertOptions::new(),
//! )?;
//! println!("{} frames", report.frames_written);
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```
//!
//! ### Variable frame rate
//!
//! Each frame is shown for the interval to the next frame's embedded
//! `header.stamp`; large gaps are clamped. Requires the `ffmpeg` executable.
//!
//! ```no_run
//! use mcap_video::{ConvertOptions, TimingMode};
//!
//! let options = ConvertOptions::new().with_timing_mode(TimingMode::HeaderStamp);
//! mcap_video::convert("recording.mcap", "/camera/image_raw", "camera.mp4", &options)?;
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed for the constant frame
//! rate encoder, and the `ffmpeg` executable must be on `PATH` for variable
//! frame rate output.

pub mod cdr;
pub mod concat;
pub mod config;
pub mod conversion;
pub mod converter;
pub mod encode;
pub mod error;
pub mod ffmpeg;
pub mod log_reader;
pub mod memory;
pub mod message_definition;
pub mod payload;
pub mod probe;
pub mod progress;
pub mod timing;
pub mod topics;
pub mod variable_framerate;

pub use concat::{ConcatManifest, VfrEncoder, quote_concat_path};
pub use config::ConvertOptions;
pub use conversion::{DecodedFrame, decode_frame};
pub use converter::{ConversionReport, ConversionState, Converter, convert};
pub use encode::{CfrWriter, VideoCodec, VideoEncoderOptions};
pub use error::ConvertError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use log_reader::{ChannelSummary, FrameHeader, ImageMessage, McapLog};
pub use memory::{
    AutoConfirm, Confirm, MemoryGuard, MemoryProbe, MemorySnapshot, SystemMemoryProbe,
};
pub use message_definition::MessageDefinition;
pub use payload::{ImagePayload, ImageSchema};
pub use probe::{DecodedVideo, VideoInfo, decode_video, probe_video};
pub use progress::{ConversionPhase, ProgressCallback, ProgressInfo};
pub use timing::{TimingMode, TimingPlan, plan_cfr, plan_vfr};
pub use topics::{image_topics, list_image_topics};
pub use variable_framerate::{TimingAnalysis, analyze_timing};
