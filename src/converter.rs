//! Two-pass streaming conversion of one image topic into a video.
//!
//! Pass 1 walks the message headers of the topic and records log times,
//! without decoding a single payload. The timing planner runs between the
//! passes. Pass 2 walks the log again, decodes each frame and hands it to the
//! encoder right away: straight into a [`CfrWriter`] for constant frame rate,
//! or to a numbered PNG file for the variable-frame-rate encoder subprocess.
//! At most one decoded raster is alive at any time.
//!
//! # Example
//!
//! ```no_run
//! use mcap_video::{ConvertOptions, Converter, TimingMode};
//!
//! let options = ConvertOptions::new().with_timing_mode(TimingMode::HeaderStamp);
//! let mut converter = Converter::new("recording.mcap", "/camera/image", &options);
//! let report = converter.run("camera.mp4")?;
//! println!("{}", report.format_summary());
//! println!("{} frames written, {} skipped", report.frames_written, report.frames_skipped);
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tempfile::TempDir;

use crate::cdr::Value;
use crate::concat::{VfrEncoder, frame_file_name};
use crate::config::ConvertOptions;
use crate::conversion::{DecodedFrame, decode_frame};
use crate::encode::CfrWriter;
use crate::error::ConvertError;
use crate::log_reader::{ImageMessage, McapLog};
use crate::memory::MemoryGuard;
use crate::payload::{ImagePayload, header_stamp_ns};
use crate::progress::{ConversionPhase, ProgressTracker, ScanTicker};
use crate::timing::{TimingMode, TimingPlan, plan_cfr, plan_vfr};
use crate::variable_framerate::{TimingAnalysis, analyze_timing};

/// Prefix of the per-conversion frame directory.
pub const TEMP_DIRECTORY_PREFIX: &str = "mcap_video_";

/// Lifecycle of a [`Converter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    /// Created, not yet run.
    Idle,
    /// Pass 1: collecting log times.
    Scanning,
    /// Pass 1 finished, timing being planned.
    Scanned,
    /// Pass 2: decoding and emitting frames.
    Converting,
    /// Flushing the in-process encoder and writing the trailer.
    FinalizingCfr,
    /// Running the encoder subprocess over the saved frames.
    FinalizingVfr,
    /// The output was written.
    Done,
    /// The run ended with an error.
    Failed,
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    /// Topic that was converted.
    pub topic: String,
    /// Path of the written video.
    pub output: PathBuf,
    /// Image messages found by the scan.
    pub frames_scanned: usize,
    /// Frames handed to the encoder.
    pub frames_written: usize,
    /// Frames dropped because they could not be decoded.
    pub frames_skipped: usize,
    /// Timing applied to the output.
    pub plan: TimingPlan,
    /// Statistics of the scanned log times.
    pub analysis: TimingAnalysis,
    /// Channel count of the first written frame.
    pub channels: Option<u32>,
    /// Last non-empty encoding (raw) or format (compressed) label seen.
    pub encoding: Option<String>,
    /// Whether some frame lacked `header.stamp` and used its log time.
    pub used_log_time_fallback: bool,
    /// Highest memory usage sampled by the memory guard.
    pub peak_memory_bytes: Option<u64>,
}

impl ConversionReport {
    /// One line describing the pixel format handling.
    pub fn format_summary(&self) -> String {
        match self.channels {
            Some(3) if self.encoding.as_deref() == Some("bgr8") => {
                "Converted from BGR (bgr8) to RGB image format".to_string()
            }
            Some(3) => "Converted as RGB image format".to_string(),
            Some(channels) => format!("Converted as {channels} channel image format"),
            None => "No frames converted".to_string(),
        }
    }
}

/// Converts one topic of one log into one video file.
#[derive(Debug)]
pub struct Converter {
    input: PathBuf,
    topic: String,
    options: ConvertOptions,
    state: ConversionState,
    /// Set once the output file may have been created.
    output_touched: bool,
}

/// Convert `topic` of `input` into `output` in one call.
///
/// # Errors
///
/// See [`Converter::run`].
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    topic: &str,
    output: Q,
    options: &ConvertOptions,
) -> Result<ConversionReport, ConvertError> {
    Converter::new(input, topic, options).run(output)
}

impl Converter {
    pub fn new<P: AsRef<Path>>(input: P, topic: &str, options: &ConvertOptions) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            topic: topic.to_string(),
            options: options.clone(),
            state: ConversionState::Idle,
            output_touched: false,
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    /// Run both passes and write `output`.
    ///
    /// On failure the partially written output is removed and the frame
    /// directory is deleted.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::InvalidState`] if this converter already ran.
    /// - [`ConvertError::FileOpen`], [`ConvertError::Mcap`] or
    ///   [`ConvertError::MessageDefinition`] for unreadable input.
    /// - [`ConvertError::NoFrames`] or [`ConvertError::InsufficientFrames`]
    ///   if the topic has fewer than two image messages.
    /// - [`ConvertError::DegenerateTiming`] if no CFR rate can be derived.
    /// - [`ConvertError::AbortedByUser`] if the low-memory prompt is declined.
    /// - Encoder errors from the CFR writer or the VFR subprocess.
    pub fn run<P: AsRef<Path>>(&mut self, output: P) -> Result<ConversionReport, ConvertError> {
        if self.state != ConversionState::Idle {
            return Err(ConvertError::InvalidState(self.state));
        }
        let output = output.as_ref();
        match self.execute(output) {
            Ok(report) => {
                self.state = ConversionState::Done;
                Ok(report)
            }
            Err(error) => {
                log::debug!("Conversion failed in state {:?}: {error}", self.state);
                self.state = ConversionState::Failed;
                if self.output_touched && output.exists() {
                    if let Err(remove_error) = fs::remove_file(output) {
                        log::warn!(
                            "Could not remove partial output {}: {remove_error}",
                            output.display()
                        );
                    }
                }
                Err(error)
            }
        }
    }

    fn execute(&mut self, output: &Path) -> Result<ConversionReport, ConvertError> {
        self.state = ConversionState::Scanning;
        let log_times = self.scan()?;
        self.state = ConversionState::Scanned;

        match log_times.len() {
            0 => {
                return Err(ConvertError::NoFrames {
                    topic: self.topic.clone(),
                });
            }
            1 => return Err(ConvertError::InsufficientFrames { found: 1 }),
            _ => {}
        }

        let analysis = analyze_timing(&log_times);
        log::debug!(
            "Scanned {} frames on {} ({:.2} fps mean, variable: {})",
            log_times.len(),
            self.topic,
            analysis.mean_frames_per_second,
            analysis.is_variable_frame_rate
        );

        let mut sink = match self.options.timing_mode {
            TimingMode::LogTime => {
                let frames_per_second = plan_cfr(&log_times)?;
                FrameSink::Cfr {
                    writer: CfrWriter::create(
                        output,
                        frames_per_second,
                        &self.options.encoder,
                    )?,
                    frames_per_second,
                }
            }
            TimingMode::HeaderStamp => {
                let encoder = self.vfr_encoder();
                if !encoder.is_available() {
                    return Err(ConvertError::EncoderUnavailable(
                        self.options.ffmpeg_binary.display().to_string(),
                    ));
                }
                FrameSink::Vfr {
                    directory: self.frame_directory()?,
                    paths: Vec::with_capacity(log_times.len()),
                    stamps: Vec::with_capacity(log_times.len()),
                }
            }
        };

        self.state = ConversionState::Converting;
        let emitted = self.emit_frames(&mut sink, log_times.len())?;
        if emitted.written == 0 {
            return Err(ConvertError::NoFrames {
                topic: self.topic.clone(),
            });
        }

        let plan = self.finalize(sink, output)?;
        log::info!(
            "Converted {} of {} frames from {} into {}",
            emitted.written,
            log_times.len(),
            self.topic,
            output.display()
        );

        Ok(ConversionReport {
            topic: self.topic.clone(),
            output: output.to_path_buf(),
            frames_scanned: log_times.len(),
            frames_written: emitted.written,
            frames_skipped: emitted.skipped,
            plan,
            analysis,
            channels: emitted.channels,
            encoding: emitted.encoding,
            used_log_time_fallback: emitted.used_log_time_fallback,
            peak_memory_bytes: emitted.peak_memory_bytes,
        })
    }

    /// Pass 1: log times of every image message on the topic.
    fn scan(&self) -> Result<Vec<i64>, ConvertError> {
        let log = McapLog::open(&self.input)?;
        let counter = Arc::new(AtomicU64::new(0));
        let mut ticker = ScanTicker::start(Arc::clone(&counter), Arc::clone(&self.options.progress));

        let mut log_times = Vec::new();
        for header in log.image_headers(&self.topic)? {
            log_times.push(log_time_ns(header?.log_time)?);
            counter.fetch_add(1, Ordering::Relaxed);
        }
        ticker.stop();
        Ok(log_times)
    }

    /// Pass 2: decode each frame and hand it to the sink.
    fn emit_frames(&mut self, sink: &mut FrameSink, total: usize) -> Result<EmitStats, ConvertError> {
        let log = McapLog::open(&self.input)?;
        let mut guard = MemoryGuard::new(
            Arc::clone(&self.options.memory_probe),
            Arc::clone(&self.options.confirm),
            self.options.memory_check_interval,
        );
        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.options.progress),
            ConversionPhase::Converting,
            Some(total as u64),
        );
        let mut stats = EmitStats::default();

        for message in log.image_messages(&self.topic)? {
            let message = message?;
            let (frame, label, stamp) = match decode_message(&message) {
                Ok(decoded) => decoded,
                Err(error) => {
                    log::warn!(
                        "Skipping frame at {} ns on {}: {error}",
                        message.log_time,
                        self.topic
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            if stats.channels.is_none() {
                stats.channels = Some(frame.channels);
            }
            if !label.is_empty() {
                stats.encoding = Some(label);
            }

            match sink {
                FrameSink::Cfr { writer, .. } => {
                    self.output_touched = true;
                    writer.push(&frame.image)?;
                }
                FrameSink::Vfr {
                    directory,
                    paths,
                    stamps,
                } => {
                    let path = directory.path().join(frame_file_name(paths.len()));
                    frame.image.save(&path)?;
                    paths.push(path);
                    let stamp = match stamp {
                        Some(stamp) => stamp,
                        None => {
                            if !stats.used_log_time_fallback {
                                log::warn!(
                                    "header.stamp is missing. Falling back to message.log_time for those frames."
                                );
                                stats.used_log_time_fallback = true;
                            }
                            log_time_ns(message.log_time)?
                        }
                    };
                    stamps.push(stamp);
                }
            }
            drop(frame);

            stats.written += 1;
            let memory = guard.check(stats.written as u64)?;
            tracker.advance(memory);
        }

        stats.peak_memory_bytes = guard.peak_bytes();
        tracker.enter(ConversionPhase::Encoding, guard.peak_bytes());
        Ok(stats)
    }

    fn finalize(&mut self, sink: FrameSink, output: &Path) -> Result<TimingPlan, ConvertError> {
        match sink {
            FrameSink::Cfr {
                writer,
                frames_per_second,
            } => {
                self.state = ConversionState::FinalizingCfr;
                writer.finish()?;
                Ok(TimingPlan::Constant { frames_per_second })
            }
            FrameSink::Vfr {
                directory,
                paths,
                stamps,
            } => {
                self.state = ConversionState::FinalizingVfr;
                let durations_ns = plan_vfr(&stamps);
                self.output_touched = true;
                self.vfr_encoder()
                    .encode(&paths, &durations_ns, directory.path(), output)?;
                let frame_directory = directory.path().to_path_buf();
                if let Err(error) = directory.close() {
                    log::warn!(
                        "Could not remove frame directory {}: {error}",
                        frame_directory.display()
                    );
                }
                Ok(TimingPlan::Variable { durations_ns })
            }
        }
    }

    fn vfr_encoder(&self) -> VfrEncoder {
        VfrEncoder::new(self.options.encoder.clone())
            .with_binary(self.options.ffmpeg_binary.clone())
            .with_log_level(self.options.ffmpeg_log_level)
    }

    fn frame_directory(&self) -> Result<TempDir, ConvertError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_DIRECTORY_PREFIX);
        let directory = match &self.options.temp_directory {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        log::debug!("Writing frames to {}", directory.path().display());
        Ok(directory)
    }
}

enum FrameSink {
    Cfr {
        writer: CfrWriter,
        frames_per_second: f64,
    },
    Vfr {
        /// Removed on drop, whichever way the conversion ends.
        directory: TempDir,
        paths: Vec<PathBuf>,
        stamps: Vec<i64>,
    },
}

#[derive(Debug, Default)]
struct EmitStats {
    written: usize,
    skipped: usize,
    channels: Option<u32>,
    encoding: Option<String>,
    used_log_time_fallback: bool,
    peak_memory_bytes: Option<u64>,
}

/// Decode one message into a raster, its label and its embedded stamp.
fn decode_message(
    message: &ImageMessage<'_>,
) -> Result<(DecodedFrame, String, Option<i64>), ConvertError> {
    let value: Value<'_> = message.decode()?;
    let payload = ImagePayload::from_value(message.schema, &value)?;
    let frame = decode_frame(&payload)?;
    Ok((frame, payload.label().to_string(), header_stamp_ns(&value)))
}

fn log_time_ns(log_time: u64) -> Result<i64, ConvertError> {
    i64::try_from(log_time)
        .map_err(|_| ConvertError::Mcap(format!("log time {log_time} ns is out of range")))
}
