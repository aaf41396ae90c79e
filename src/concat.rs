//! Variable-frame-rate output through the `ffmpeg` concat demuxer.
//!
//! VFR frames are first saved as numbered PNG files. A [`ConcatManifest`]
//! lists every file with the time it stays on screen, and [`VfrEncoder`]
//! runs the `ffmpeg` executable on that manifest:
//!
//! ```text
//! file '/tmp/mcap_video_x/frame_000000.png'
//! duration 0.100000000
//! file '/tmp/mcap_video_x/frame_000001.png'
//! duration 0.100000000
//! file '/tmp/mcap_video_x/frame_000001.png'
//! ```
//!
//! The concat demuxer ignores the duration of the final entry, so the last
//! file is listed a second time without one.

use std::{
    ffi::OsString,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::encode::VideoEncoderOptions;
use crate::error::ConvertError;
use crate::ffmpeg::FfmpegLogLevel;
use crate::timing::NANOSECONDS_PER_SECOND;

/// Default name of the encoder executable.
pub const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";

/// File name of the manifest inside the work directory.
pub const MANIFEST_FILE_NAME: &str = "list.txt";

/// File name for the frame at `index` inside the work directory.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:06}.png")
}

/// Quote a path for a concat manifest `file` directive.
///
/// The path is wrapped in single quotes; embedded quotes become `'\''`.
pub fn quote_concat_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    format!("'{}'", text.replace('\'', r"'\''"))
}

fn format_seconds(duration_ns: i64) -> String {
    format!(
        "{}.{:09}",
        duration_ns / NANOSECONDS_PER_SECOND,
        duration_ns % NANOSECONDS_PER_SECOND
    )
}

/// A concat demuxer script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatManifest {
    entries: Vec<(PathBuf, i64)>,
}

impl ConcatManifest {
    /// Pair each frame file with its duration.
    ///
    /// Paths are made absolute so the manifest does not depend on the
    /// encoder's working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::FrameCountMismatch`] if the lists differ in
    /// length or are empty, and [`ConvertError::Io`] if a path cannot be
    /// made absolute.
    pub fn new(frames: &[PathBuf], durations_ns: &[i64]) -> Result<Self, ConvertError> {
        if frames.len() != durations_ns.len() || frames.is_empty() {
            return Err(ConvertError::FrameCountMismatch {
                frames: frames.len(),
                durations: durations_ns.len(),
            });
        }
        let entries = frames
            .iter()
            .zip(durations_ns)
            .map(|(frame, &duration)| Ok((std::path::absolute(frame)?, duration)))
            .collect::<Result<Vec<_>, ConvertError>>()?;
        Ok(Self { entries })
    }

    /// Number of frames listed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Manifest text.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (path, duration_ns) in &self.entries {
            text.push_str(&format!("file {}\n", quote_concat_path(path)));
            text.push_str(&format!("duration {}\n", format_seconds(*duration_ns)));
        }
        if let Some((last, _)) = self.entries.last() {
            text.push_str(&format!("file {}\n", quote_concat_path(last)));
        }
        text
    }

    /// Write the manifest to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ConvertError> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Runs the `ffmpeg` executable over a concat manifest.
#[derive(Debug, Clone)]
pub struct VfrEncoder {
    binary: PathBuf,
    log_level: FfmpegLogLevel,
    options: VideoEncoderOptions,
}

impl Default for VfrEncoder {
    fn default() -> Self {
        Self::new(VideoEncoderOptions::default())
    }
}

impl VfrEncoder {
    pub fn new(options: VideoEncoderOptions) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_FFMPEG_BINARY),
            log_level: FfmpegLogLevel::Warning,
            options,
        }
    }

    /// Use a different executable name or path.
    #[must_use]
    pub fn with_binary<P: Into<PathBuf>>(mut self, binary: P) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the `-loglevel` passed to the executable.
    #[must_use]
    pub fn with_log_level(mut self, level: FfmpegLogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Whether the executable can be found on `PATH` (or at its path).
    pub fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    /// Arguments for encoding `manifest` into `output`.
    pub fn arguments(&self, manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            self.log_level.as_str(),
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(manifest.as_os_str().to_owned());
        args.extend(["-vsync", "vfr", "-pix_fmt", "yuv420p"].map(OsString::from));
        args.push("-c:v".into());
        args.push(self.options.codec.encoder_name().into());
        if let Some(crf) = self.options.effective_crf() {
            args.push("-crf".into());
            args.push(crf.to_string().into());
        }
        // 4:2:0 output needs even dimensions.
        args.push("-vf".into());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Write the manifest for `frames` into `work_dir` and encode `output`.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::FrameCountMismatch`] if `frames` and `durations_ns`
    ///   differ in length.
    /// - [`ConvertError::EncoderUnavailable`] if the executable is missing.
    /// - [`ConvertError::EncoderFailed`] with the encoder's stderr if it
    ///   exits unsuccessfully.
    pub fn encode(
        &self,
        frames: &[PathBuf],
        durations_ns: &[i64],
        work_dir: &Path,
        output: &Path,
    ) -> Result<(), ConvertError> {
        let manifest = ConcatManifest::new(frames, durations_ns)?;
        let manifest_path = work_dir.join(MANIFEST_FILE_NAME);
        manifest.write(&manifest_path)?;

        let executable = which::which(&self.binary).map_err(|_| {
            ConvertError::EncoderUnavailable(self.binary.display().to_string())
        })?;
        let arguments = self.arguments(&manifest_path, output);
        log::debug!("Running {} {:?}", executable.display(), arguments);

        let result = Command::new(&executable)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => {
                    ConvertError::EncoderUnavailable(self.binary.display().to_string())
                }
                _ => ConvertError::Io(error),
            })?;

        if !result.status.success() {
            return Err(ConvertError::EncoderFailed(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        log::info!("Encoded {} frames into {}", manifest.len(), output.display());
        Ok(())
    }
}
