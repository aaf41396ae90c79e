//! End-to-end conversion tests.
//!
//! Fixture logs are generated on the fly. Tests that need an encoder which
//! is not installed return early.

mod common;

use common::{
    BLUE, COMPRESSED_DEFINITION, COMPRESSED_SCHEMA, ChannelSpec, GREEN, HEIGHT, IMAGE_DEFINITION,
    IMAGE_SCHEMA, MessageSpec, RED, STAMPED_IMAGE_DEFINITION, WIDTH, color_close,
    compressed_image, ffmpeg_binary_available, is_encoder_unavailable, raw_image, solid_jpeg,
    solid_pixels, write_color_log, write_mcap,
};
use mcap_video::{
    ConversionReport, ConvertError, ConvertOptions, Converter, ConversionState, TimingMode,
    TimingPlan, decode_video,
};

const TOPIC: &str = "/camera/image_raw";

fn convert_or_skip(
    input: &std::path::Path,
    output: &std::path::Path,
    options: &ConvertOptions,
) -> Option<ConversionReport> {
    match mcap_video::convert(input, TOPIC, output, options) {
        Ok(report) => Some(report),
        Err(error) if is_encoder_unavailable(&error) => {
            eprintln!("skipping: {error}");
            None
        }
        Err(error) => panic!("conversion failed: {error}"),
    }
}

fn center(image: &image::RgbImage) -> [u8; 3] {
    image.get_pixel(image.width() / 2, image.height() / 2).0
}

#[test]
fn bgr_frames_convert_at_log_rate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("colors.mp4");
    let colors = [RED, GREEN, BLUE, RED, GREEN, BLUE, RED, GREEN, BLUE, RED];
    write_color_log(&input, &colors, 100_000_000, "bgr8", false);

    let Some(report) = convert_or_skip(&input, &output, &ConvertOptions::new()) else {
        return;
    };
    assert_eq!(report.frames_scanned, colors.len());
    assert_eq!(report.frames_written, colors.len());
    assert_eq!(report.frames_skipped, 0);
    assert_eq!(report.channels, Some(3));
    assert_eq!(
        report.format_summary(),
        "Converted from BGR (bgr8) to RGB image format"
    );
    match report.plan {
        TimingPlan::Constant { frames_per_second } => {
            assert!((frames_per_second - 10.0).abs() < 1e-6, "{frames_per_second}")
        }
        TimingPlan::Variable { .. } => panic!("expected a constant plan"),
    }

    let video = decode_video(&output).expect("decode output");
    assert_eq!((video.info.width, video.info.height), (WIDTH, HEIGHT));
    assert!(
        (video.info.frames_per_second - 10.0).abs() < 1.0,
        "fps {}",
        video.info.frames_per_second
    );
    assert_eq!(video.frames.len(), colors.len());
    for (index, (frame, &expected)) in video.frames.iter().zip(&colors).enumerate() {
        let actual = center(frame);
        assert!(
            color_close(actual, expected, 30),
            "frame {index}: expected {expected:?}, got {actual:?}"
        );
    }
}

#[test]
fn identical_log_times_are_degenerate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("frozen.mcap");
    let output = dir.path().join("frozen.mp4");
    write_color_log(&input, &[RED, GREEN, BLUE], 0, "rgb8", false);

    let error = mcap_video::convert(&input, TOPIC, &output, &ConvertOptions::new()).unwrap_err();
    assert!(matches!(error, ConvertError::DegenerateTiming(_)), "unexpected error: {error}");
    assert!(!output.exists());
}

#[test]
fn single_frame_is_insufficient() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("single.mcap");
    let output = dir.path().join("single.mp4");
    write_color_log(&input, &[RED], 100_000_000, "rgb8", false);

    let error = mcap_video::convert(&input, TOPIC, &output, &ConvertOptions::new()).unwrap_err();
    assert!(matches!(error, ConvertError::InsufficientFrames { found: 1 }));
    assert!(!output.exists());
}

#[test]
fn unknown_topic_has_no_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("none.mp4");
    write_color_log(&input, &[RED, GREEN], 100_000_000, "rgb8", false);

    let error = mcap_video::convert(&input, "/camera/missing", &output, &ConvertOptions::new())
        .unwrap_err();
    assert!(
        matches!(&error, ConvertError::NoFrames { topic } if topic == "/camera/missing"),
        "unexpected error: {error}"
    );
}

#[test]
fn failed_scan_keeps_existing_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("keep.mp4");
    std::fs::write(&output, b"previous").expect("seed output");

    let error = mcap_video::convert(
        dir.path().join("absent.mcap"),
        TOPIC,
        &output,
        &ConvertOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(error, ConvertError::FileOpen { .. }));
    assert_eq!(std::fs::read(&output).expect("read output"), b"previous");
}

#[test]
fn compressed_frames_convert() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("compressed.mcap");
    let output = dir.path().join("compressed.mp4");
    let colors = [RED, GREEN, BLUE, RED];
    let messages: Vec<MessageSpec> = colors
        .iter()
        .enumerate()
        .map(|(index, &color)| MessageSpec {
            channel: 0,
            log_time: 2_000_000_000 + index as u64 * 50_000_000,
            data: compressed_image("jpeg", &solid_jpeg(color, WIDTH, HEIGHT)),
        })
        .collect();
    write_mcap(
        &input,
        &[ChannelSpec {
            topic: TOPIC,
            schema_name: COMPRESSED_SCHEMA,
            definition: COMPRESSED_DEFINITION,
        }],
        &messages,
    );

    let Some(report) = convert_or_skip(&input, &output, &ConvertOptions::new()) else {
        return;
    };
    assert_eq!(report.frames_written, colors.len());
    assert_eq!(report.encoding.as_deref(), Some("jpeg"));
    assert_eq!(report.format_summary(), "Converted as RGB image format");

    let video = decode_video(&output).expect("decode output");
    assert_eq!(video.frames.len(), colors.len());
    for (frame, &expected) in video.frames.iter().zip(&colors) {
        assert!(color_close(center(frame), expected, 40));
    }
}

#[test]
fn undecodable_frames_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("broken.mcap");
    let output = dir.path().join("broken.mp4");
    let good = |color| raw_image(None, WIDTH, HEIGHT, "rgb8", &solid_pixels(color, "rgb8", WIDTH, HEIGHT));
    let payloads = [
        good(RED),
        raw_image(None, WIDTH, 0, "rgb8", &[]),
        good(GREEN),
        raw_image(None, 2, 2, "rgb8", &[1, 2, 3, 4, 5]),
        good(BLUE),
    ];
    let messages: Vec<MessageSpec> = payloads
        .into_iter()
        .enumerate()
        .map(|(index, data)| MessageSpec {
            channel: 0,
            log_time: 1_000_000_000 + index as u64 * 100_000_000,
            data,
        })
        .collect();
    write_mcap(
        &input,
        &[ChannelSpec {
            topic: TOPIC,
            schema_name: IMAGE_SCHEMA,
            definition: IMAGE_DEFINITION,
        }],
        &messages,
    );

    let Some(report) = convert_or_skip(&input, &output, &ConvertOptions::new()) else {
        return;
    };
    assert_eq!(report.frames_scanned, 5);
    assert_eq!(report.frames_written, 3);
    assert_eq!(report.frames_skipped, 2);
    let video = decode_video(&output).expect("decode output");
    assert_eq!(video.frames.len(), 3);
}

#[test]
fn header_stamps_drive_variable_rate() {
    if !ffmpeg_binary_available() {
        eprintln!("skipping: ffmpeg executable not found");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("stamped.mcap");
    let output = dir.path().join("stamped.mp4");

    // Stamps 0.0, 0.1, 0.2, 0.5 s; log times are evenly spaced on purpose.
    let stamps_ns: [u64; 4] = [10_000_000_000, 10_100_000_000, 10_200_000_000, 10_500_000_000];
    let colors = [RED, GREEN, BLUE, RED];
    let messages: Vec<MessageSpec> = stamps_ns
        .iter()
        .zip(colors)
        .enumerate()
        .map(|(index, (&stamp, color))| MessageSpec {
            channel: 0,
            log_time: 1_000_000_000 + index as u64 * 10_000_000,
            data: raw_image(
                Some(((stamp / 1_000_000_000) as i32, (stamp % 1_000_000_000) as u32)),
                WIDTH,
                HEIGHT,
                "rgb8",
                &solid_pixels(color, "rgb8", WIDTH, HEIGHT),
            ),
        })
        .collect();
    write_mcap(
        &input,
        &[ChannelSpec {
            topic: TOPIC,
            schema_name: IMAGE_SCHEMA,
            definition: STAMPED_IMAGE_DEFINITION,
        }],
        &messages,
    );

    let frame_root = dir.path().join("frames");
    std::fs::create_dir(&frame_root).expect("frame root");
    let options = ConvertOptions::new()
        .with_timing_mode(TimingMode::HeaderStamp)
        .with_temp_directory(&frame_root);
    let Some(report) = convert_or_skip(&input, &output, &options) else {
        return;
    };

    assert!(!report.used_log_time_fallback);
    assert_eq!(
        report.plan,
        TimingPlan::Variable {
            durations_ns: vec![100_000_000, 100_000_000, 300_000_000, 300_000_000]
        }
    );
    assert_eq!(std::fs::read_dir(&frame_root).expect("read").count(), 0);

    let video = decode_video(&output).expect("decode output");
    assert!(video.frames.len() >= colors.len(), "{} frames", video.frames.len());
    let gaps: Vec<f64> = video.timestamps.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert!((gaps[0] - 0.1).abs() < 0.02, "{gaps:?}");
    assert!((gaps[2] - 0.3).abs() < 0.02, "{gaps:?}");
}

#[test]
fn missing_stamps_fall_back_to_log_time() {
    if !ffmpeg_binary_available() {
        eprintln!("skipping: ffmpeg executable not found");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("unstamped.mcap");
    let output = dir.path().join("unstamped.mp4");
    write_color_log(&input, &[RED, GREEN, BLUE], 100_000_000, "rgb8", false);

    let options = ConvertOptions::new().with_timing_mode(TimingMode::HeaderStamp);
    let Some(report) = convert_or_skip(&input, &output, &options) else {
        return;
    };
    assert!(report.used_log_time_fallback);
    assert_eq!(
        report.plan,
        TimingPlan::Variable {
            durations_ns: vec![100_000_000; 3]
        }
    );
}

#[test]
fn converter_runs_only_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("single.mcap");
    write_color_log(&input, &[RED], 100_000_000, "rgb8", false);

    let options = ConvertOptions::new();
    let mut converter = Converter::new(&input, TOPIC, &options);
    assert_eq!(converter.state(), ConversionState::Idle);
    assert!(converter.run(dir.path().join("a.mp4")).is_err());
    let error = converter.run(dir.path().join("b.mp4")).unwrap_err();
    assert!(matches!(error, ConvertError::InvalidState(ConversionState::Failed)));
}

#[test]
fn truncated_video_decode_terminates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("colors.mcap");
    let output = dir.path().join("colors.mkv");
    let colors = [RED, GREEN, BLUE, RED, GREEN, BLUE, RED, GREEN];
    write_color_log(&input, &colors, 100_000_000, "rgb8", false);
    if convert_or_skip(&input, &output, &ConvertOptions::new()).is_none() {
        return;
    }

    let bytes = std::fs::read(&output).expect("read output");
    let truncated = dir.path().join("truncated.mkv");
    std::fs::write(&truncated, &bytes[..bytes.len() * 3 / 5]).expect("write truncated");

    let (sender, receiver) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let frames = decode_video(&truncated).map(|video| video.frames.len());
        let _ = sender.send(frames);
    });
    let result = receiver
        .recv_timeout(std::time::Duration::from_secs(30))
        .expect("decoding a truncated file must finish");
    if let Ok(frames) = result {
        assert!(frames <= colors.len());
    }
}
