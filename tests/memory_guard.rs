//! Low-memory confirmation during the emit pass.

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use common::{BLUE, GREEN, RED, is_encoder_unavailable, write_color_log};
use mcap_video::{
    Confirm, ConvertError, ConvertOptions, Converter, ConversionState, MemoryProbe,
    MemorySnapshot, TimingMode,
};

/// Reports usage well above the limit.
struct Starved;

impl MemoryProbe for Starved {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        Some(MemorySnapshot {
            used_bytes: 900 * 1024 * 1024,
            available_bytes: 1024 * 1024 * 1024,
            total_bytes: 4 * 1024 * 1024 * 1024,
        })
    }
}

/// Answers every prompt the same way and counts how often it was asked.
struct Answer {
    accept: bool,
    asked: AtomicUsize,
}

impl Answer {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            asked: AtomicUsize::new(0),
        })
    }
}

impl Confirm for Answer {
    fn confirm(&self, _message: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

#[test]
fn declining_aborts_and_cleans_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("out.mp4");
    let frame_root = dir.path().join("frames");
    std::fs::create_dir(&frame_root).expect("frame root");
    write_color_log(&input, &[RED, GREEN, BLUE, RED], 100_000_000, "rgb8", true);

    let answer = Answer::new(false);
    // The executable only has to exist: the abort happens before it runs.
    let stand_in = std::env::current_exe().expect("test executable");
    let options = ConvertOptions::new()
        .with_timing_mode(TimingMode::HeaderStamp)
        .with_memory_probe(Arc::new(Starved))
        .with_confirm(answer.clone())
        .with_memory_check_interval(1)
        .with_ffmpeg_binary(stand_in)
        .with_temp_directory(&frame_root);

    let mut converter = Converter::new(&input, "/camera/image_raw", &options);
    let error = converter.run(&output).unwrap_err();
    assert!(matches!(error, ConvertError::AbortedByUser), "unexpected error: {error}");
    assert_eq!(converter.state(), ConversionState::Failed);
    assert_eq!(answer.asked.load(Ordering::SeqCst), 1);
    assert!(!output.exists());
    let leftovers = std::fs::read_dir(&frame_root).expect("read frame root").count();
    assert_eq!(leftovers, 0, "frame directory was not removed");
}

#[test]
fn accepting_continues_and_asks_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("out.mp4");
    write_color_log(&input, &[RED, GREEN, BLUE, RED, GREEN], 100_000_000, "rgb8", false);

    let answer = Answer::new(true);
    let options = ConvertOptions::new()
        .with_memory_probe(Arc::new(Starved))
        .with_confirm(answer.clone())
        .with_memory_check_interval(1);

    let report = match mcap_video::convert(&input, "/camera/image_raw", &output, &options) {
        Ok(report) => report,
        Err(error) if is_encoder_unavailable(&error) => {
            eprintln!("skipping: {error}");
            return;
        }
        Err(error) => panic!("conversion failed: {error}"),
    };
    assert_eq!(report.frames_written, 5);
    assert_eq!(answer.asked.load(Ordering::SeqCst), 1);
    assert_eq!(report.peak_memory_bytes, Some(900 * 1024 * 1024));
    assert!(output.exists());
}

#[test]
fn disabled_interval_never_asks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("out.mp4");
    write_color_log(&input, &[RED, GREEN, BLUE], 100_000_000, "rgb8", false);

    let answer = Answer::new(false);
    let options = ConvertOptions::new()
        .with_memory_probe(Arc::new(Starved))
        .with_confirm(answer.clone())
        .with_memory_check_interval(0);

    match mcap_video::convert(&input, "/camera/image_raw", &output, &options) {
        Ok(report) => assert_eq!(report.peak_memory_bytes, None),
        Err(error) if is_encoder_unavailable(&error) => eprintln!("skipping: {error}"),
        Err(error) => panic!("conversion failed: {error}"),
    }
    assert_eq!(answer.asked.load(Ordering::SeqCst), 0);
}
