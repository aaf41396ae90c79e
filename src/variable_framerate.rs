//! Variable frame rate (VFR) detection on recorded timestamps.
//!
//! [`analyze_timing`] summarizes the spacing of a topic's frames: mean and
//! spread of the inter-frame interval and the instantaneous frame-rate range.
//! The analysis is descriptive only; it is reported alongside a conversion
//! and never changes which [`TimingPlan`](crate::TimingPlan) is used.
//!
//! # Example
//!
//! ```
//! use mcap_video::analyze_timing;
//!
//! let analysis = analyze_timing(&[0, 100_000_000, 150_000_000, 400_000_000]);
//! if analysis.is_variable_frame_rate {
//!     println!("VFR detected! FPS range: {:.2}–{:.2}",
//!         analysis.min_frames_per_second, analysis.max_frames_per_second);
//! }
//! ```

use crate::timing::NANOSECONDS_PER_SECOND;

/// Results of timing analysis on one topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingAnalysis {
    /// Whether the spacing looks variable.
    ///
    /// This is `true` when the standard deviation of the positive
    /// inter-frame intervals exceeds 10% of their mean.
    pub is_variable_frame_rate: bool,
    /// Mean positive interval in seconds.
    pub mean_frame_duration: f64,
    /// Standard deviation of the positive intervals in seconds.
    pub frame_duration_stddev: f64,
    /// Minimum instantaneous FPS observed.
    pub min_frames_per_second: f64,
    /// Maximum instantaneous FPS observed.
    pub max_frames_per_second: f64,
    /// Mean FPS (1 / mean_frame_duration).
    pub mean_frames_per_second: f64,
    /// Number of timestamps analyzed.
    pub frames_analyzed: u64,
    /// Number of intervals that were zero or negative.
    pub non_increasing_intervals: u64,
}

/// Analyze the spacing of a timestamp sequence (nanoseconds, log order).
pub fn analyze_timing(timestamps_ns: &[i64]) -> TimingAnalysis {
    let frames_analyzed = timestamps_ns.len() as u64;
    if timestamps_ns.len() < 2 {
        return TimingAnalysis {
            frames_analyzed,
            ..TimingAnalysis::default()
        };
    }

    let raw: Vec<i64> = timestamps_ns
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .collect();
    let non_increasing_intervals = raw.iter().filter(|&&d| d <= 0).count() as u64;

    let durations: Vec<f64> = raw
        .iter()
        .filter(|&&d| d > 0)
        .map(|&d| d as f64 / NANOSECONDS_PER_SECOND as f64)
        .collect();

    if durations.is_empty() {
        return TimingAnalysis {
            frames_analyzed,
            non_increasing_intervals,
            ..TimingAnalysis::default()
        };
    }

    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    let variance =
        durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / durations.len() as f64;
    let stddev = variance.sqrt();

    let min_duration = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max_duration = durations.iter().copied().fold(0.0_f64, f64::max);

    let max_frames_per_second = 1.0 / min_duration;
    let min_frames_per_second = 1.0 / max_duration;
    // 1/mean can land a hair outside [min, max] through rounding.
    let mean_frames_per_second =
        (1.0 / mean).clamp(min_frames_per_second, max_frames_per_second);

    TimingAnalysis {
        is_variable_frame_rate: stddev / mean > 0.10,
        mean_frame_duration: mean,
        frame_duration_stddev: stddev,
        min_frames_per_second,
        max_frames_per_second,
        mean_frames_per_second,
        frames_analyzed,
        non_increasing_intervals,
    }
}
