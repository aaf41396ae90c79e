use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use mcap_video::{
    Confirm, ConversionPhase, ConversionReport, ConvertOptions, FfmpegLogLevel, McapLog,
    ProgressCallback, ProgressInfo, TimingMode, TimingPlan, VideoCodec, VideoEncoderOptions,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const CLI_AFTER_HELP: &str = "Examples:\n  mcap-video recording.mcap\n  mcap-video recording.mcap -t /camera/image_raw -o camera.mp4\n  mcap-video recording.mcap -t /camera/image_raw --timestamp-timing --crf 20\n  mcap-video recording.mcap --json";

const BYTES_PER_MEBIBYTE: u64 = 1024 * 1024;

#[derive(Debug, Parser)]
#[command(
    name = "mcap-video",
    version,
    about = "Convert ROS 2 image topics in MCAP logs to MP4 video",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    /// Input MCAP file to read.
    input: PathBuf,

    /// Image topic to convert. Lists the image topics when omitted.
    #[arg(short, long)]
    topic: Option<String>,

    /// Output video file.
    #[arg(short, long, default_value = "output.mp4")]
    output: PathBuf,

    /// Use each frame's header.stamp for variable frame rate timing.
    #[arg(long)]
    timestamp_timing: bool,

    /// Continue without asking when memory runs low.
    #[arg(short, long)]
    yes: bool,

    /// Show debug logging.
    #[arg(long)]
    verbose: bool,

    /// Print machine-readable JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Video codec (h264, h265, mpeg4).
    #[arg(long)]
    codec: Option<String>,

    /// Constant Rate Factor (0-51, lower is better).
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=51))]
    crf: Option<u32>,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    ffmpeg_log_level: Option<String>,

    /// Allow overwriting an existing output file.
    #[arg(long)]
    overwrite: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn ensure_input_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("File does not exist: {}", path.display()).into());
    }
    Ok(())
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn encoder_options(cli: &Cli) -> Result<VideoEncoderOptions, Box<dyn std::error::Error>> {
    let mut options = VideoEncoderOptions::default();
    if let Some(codec) = &cli.codec {
        options = options.codec(codec.parse::<VideoCodec>()?);
    }
    if let Some(crf) = cli.crf {
        options = options.crf(crf);
    }
    Ok(options)
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Spinner while scanning, bar while converting.
struct TerminalProgress {
    spinner: ProgressBar,
    bar: OnceLock<ProgressBar>,
    hidden: bool,
}

impl TerminalProgress {
    fn new(hidden: bool) -> Self {
        let spinner = if hidden {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner
        };
        Self {
            spinner,
            bar: OnceLock::new(),
            hidden,
        }
    }

    fn bar(&self, total: u64) -> &ProgressBar {
        self.bar.get_or_init(|| {
            self.spinner.finish_and_clear();
            if self.hidden {
                return ProgressBar::hidden();
            }
            let bar = ProgressBar::new(total);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("##-"));
            }
            bar
        })
    }

    fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.bar.get() {
            Some(bar) => bar.suspend(f),
            None => self.spinner.suspend(f),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
        if let Some(bar) = self.bar.get() {
            bar.finish_with_message("done");
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        match info.phase {
            ConversionPhase::Scanning => {
                self.spinner
                    .set_message(format!("scanning: {} frames", info.current));
                self.spinner.tick();
            }
            ConversionPhase::Converting => {
                let bar = self.bar(info.total.unwrap_or(0));
                bar.set_position(info.current);
                if let Some(bytes) = info.memory_bytes {
                    bar.set_message(format!("{} MiB", bytes / BYTES_PER_MEBIBYTE));
                }
            }
            ConversionPhase::Encoding => {
                self.bar(info.total.unwrap_or(0)).set_message("encoding");
            }
            _ => {}
        }
    }
}

/// Asks on stdin before continuing past a low-memory warning.
struct TerminalConfirm {
    assume_yes: bool,
    progress: Arc<TerminalProgress>,
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            self.progress.suspend(|| {
                eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
            });
            return true;
        }
        self.progress.suspend(|| {
            eprint!(
                "{} {} Continue? [y/N] ",
                "warning:".yellow().bold(),
                message.yellow()
            );
            if io::stderr().flush().is_err() {
                return false;
            }
            let mut answer = String::new();
            match io::stdin().lock().read_line(&mut answer) {
                Ok(_) => is_affirmative(&answer),
                Err(_) => false,
            }
        })
    }
}

fn list_topics(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let log = McapLog::open(&cli.input)?;
    let topics = mcap_video::image_topics(&log)?;

    if cli.json {
        let payload = json!({
            "input": cli.input.display().to_string(),
            "topics": topics,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Available topics:");
    for topic in &topics {
        println!("  {topic}");
    }
    if topics.is_empty() {
        println!("  {}", "(no image topics)".dimmed());
    }
    if cli.verbose {
        for (topic, schema) in log.channels_with_schema()? {
            if !topics.contains(&topic) {
                println!("  {} {}", topic.dimmed(), format!("[{schema}]").dimmed());
            }
        }
    }
    Ok(())
}

fn report_json(report: &ConversionReport) -> serde_json::Value {
    let (mode, fps, durations) = match &report.plan {
        TimingPlan::Constant { frames_per_second } => ("cfr", Some(*frames_per_second), None),
        TimingPlan::Variable { durations_ns } => ("vfr", None, Some(durations_ns.len())),
    };
    json!({
        "topic": report.topic,
        "output": report.output.display().to_string(),
        "frames_scanned": report.frames_scanned,
        "frames_written": report.frames_written,
        "frames_skipped": report.frames_skipped,
        "timing": {
            "mode": mode,
            "fps": fps,
            "durations": durations,
            "mean_fps": report.analysis.mean_frames_per_second,
            "variable": report.analysis.is_variable_frame_rate,
        },
        "channels": report.channels,
        "encoding": report.encoding,
        "header_stamp_fallback": report.used_log_time_fallback,
        "peak_memory_bytes": report.peak_memory_bytes,
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    ensure_input_file(&cli.input)?;

    let ffmpeg_log_level = match &cli.ffmpeg_log_level {
        Some(level) => level.parse::<FfmpegLogLevel>()?,
        None => FfmpegLogLevel::default(),
    };
    mcap_video::set_ffmpeg_log_level(ffmpeg_log_level);

    let Some(topic) = cli.topic.clone() else {
        return list_topics(&cli);
    };

    ensure_writable_path(&cli.output, cli.overwrite)?;
    if !cli.json {
        println!("Converting {topic} to MP4...");
    }

    let progress = Arc::new(TerminalProgress::new(cli.json));
    let confirm = Arc::new(TerminalConfirm {
        assume_yes: cli.yes,
        progress: Arc::clone(&progress),
    });
    let timing_mode = if cli.timestamp_timing {
        TimingMode::HeaderStamp
    } else {
        TimingMode::LogTime
    };
    let options = ConvertOptions::new()
        .with_timing_mode(timing_mode)
        .with_encoder_options(encoder_options(&cli)?)
        .with_ffmpeg_log_level(ffmpeg_log_level)
        .with_progress(progress.clone())
        .with_confirm(confirm);

    let result = mcap_video::convert(&cli.input, &topic, &cli.output, &options);
    progress.finish();
    let report = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        return Ok(());
    }

    println!("Total {} frames", report.frames_written);
    if report.frames_skipped > 0 {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            format!("skipped {} undecodable frame(s)", report.frames_skipped).yellow()
        );
    }
    if report.used_log_time_fallback {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "header.stamp is missing. Fell back to message.log_time for those frames.".yellow()
        );
    }
    println!("{}", report.format_summary());
    match &report.plan {
        TimingPlan::Constant { frames_per_second } => {
            println!("Constant frame rate: {frames_per_second:.3} fps");
        }
        TimingPlan::Variable { durations_ns } => {
            let seconds = durations_ns.iter().sum::<i64>() as f64 / 1e9;
            println!("Variable frame rate: {seconds:.3} s over {} frames", durations_ns.len());
        }
    }

    if cli.verbose {
        match mcap_video::probe_video(&cli.output) {
            Ok(info) => println!(
                "Video: {}x{} @ {:.2} fps [{}]",
                info.width, info.height, info.frames_per_second, info.codec
            ),
            Err(error) => eprintln!("{} {error}", "warning:".yellow().bold()),
        }
        if let Some(peak) = report.peak_memory_bytes {
            println!("Peak memory: {} MiB", peak / BYTES_PER_MEBIBYTE);
        }
    }

    println!(
        "{} {}",
        "success:".green().bold(),
        format!("Done. Wrote {}", cli.output.display()).green()
    );
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
