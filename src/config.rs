//! Conversion configuration.
//!
//! [`ConvertOptions`] is a builder that threads the timing mode, progress
//! callback, low-memory confirmation and encoder settings through a
//! conversion without growing the [`convert`](crate::convert) signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcap_video::{ConvertOptions, TimingMode, VideoCodec, VideoEncoderOptions};
//!
//! let options = ConvertOptions::new()
//!     .with_timing_mode(TimingMode::HeaderStamp)
//!     .with_encoder_options(VideoEncoderOptions::default().codec(VideoCodec::H264).crf(20))
//!     .with_memory_check_interval(50);
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::PathBuf,
    sync::Arc,
};

use crate::concat::DEFAULT_FFMPEG_BINARY;
use crate::encode::VideoEncoderOptions;
use crate::ffmpeg::FfmpegLogLevel;
use crate::memory::{AutoConfirm, Confirm, DEFAULT_CHECK_INTERVAL, MemoryProbe, SystemMemoryProbe};
use crate::progress::{NoOpProgress, ProgressCallback};
use crate::timing::TimingMode;

/// Settings for one conversion.
///
/// A default-constructed value converts at a constant frame rate derived
/// from log receipt times, checks memory every 100 frames and continues
/// past a low-memory warning after logging it.
#[derive(Clone)]
pub struct ConvertOptions {
    pub(crate) timing_mode: TimingMode,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) confirm: Arc<dyn Confirm>,
    pub(crate) memory_probe: Arc<dyn MemoryProbe>,
    /// Frames between memory checks; zero disables them.
    pub(crate) memory_check_interval: u64,
    pub(crate) encoder: VideoEncoderOptions,
    pub(crate) ffmpeg_binary: PathBuf,
    pub(crate) ffmpeg_log_level: FfmpegLogLevel,
    /// Parent directory for the VFR frame directory. `None` uses the system
    /// temporary directory.
    pub(crate) temp_directory: Option<PathBuf>,
}

impl Debug for ConvertOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConvertOptions")
            .field("timing_mode", &self.timing_mode)
            .field("memory_check_interval", &self.memory_check_interval)
            .field("encoder", &self.encoder)
            .field("ffmpeg_binary", &self.ffmpeg_binary)
            .field("ffmpeg_log_level", &self.ffmpeg_log_level)
            .field("temp_directory", &self.temp_directory)
            .finish_non_exhaustive()
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvertOptions {
    pub fn new() -> Self {
        Self {
            timing_mode: TimingMode::LogTime,
            progress: Arc::new(NoOpProgress),
            confirm: Arc::new(AutoConfirm),
            memory_probe: Arc::new(SystemMemoryProbe::new()),
            memory_check_interval: DEFAULT_CHECK_INTERVAL,
            encoder: VideoEncoderOptions::default(),
            ffmpeg_binary: PathBuf::from(DEFAULT_FFMPEG_BINARY),
            ffmpeg_log_level: FfmpegLogLevel::Warning,
            temp_directory: None,
        }
    }

    /// Choose CFR from log times ([`TimingMode::LogTime`], the default) or
    /// VFR from embedded header stamps ([`TimingMode::HeaderStamp`]).
    #[must_use]
    pub fn with_timing_mode(mut self, mode: TimingMode) -> Self {
        self.timing_mode = mode;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Who to ask when memory runs low.
    #[must_use]
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Check memory every `frames` emitted frames; zero disables checks.
    #[must_use]
    pub fn with_memory_check_interval(mut self, frames: u64) -> Self {
        self.memory_check_interval = frames;
        self
    }

    /// Replace the `sysinfo` memory probe.
    #[must_use]
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }

    #[must_use]
    pub fn with_encoder_options(mut self, options: VideoEncoderOptions) -> Self {
        self.encoder = options;
        self
    }

    /// Executable used for VFR output. Defaults to `ffmpeg` on `PATH`.
    #[must_use]
    pub fn with_ffmpeg_binary<P: Into<PathBuf>>(mut self, binary: P) -> Self {
        self.ffmpeg_binary = binary.into();
        self
    }

    /// `-loglevel` passed to the VFR encoder executable.
    #[must_use]
    pub fn with_ffmpeg_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.ffmpeg_log_level = level;
        self
    }

    /// Create VFR frame directories under `directory`.
    #[must_use]
    pub fn with_temp_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.temp_directory = Some(directory.into());
        self
    }

    pub fn timing_mode(&self) -> TimingMode {
        self.timing_mode
    }

    pub fn encoder_options(&self) -> &VideoEncoderOptions {
        &self.encoder
    }
}
