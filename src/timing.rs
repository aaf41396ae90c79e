//! Frame-timing synthesis.
//!
//! Turns the irregular timestamp sequence of one topic into either a single
//! representative frame rate (CFR, [`plan_cfr`]) or one display duration per
//! frame (VFR, [`plan_vfr`]). Both are pure functions of the timestamps.
//!
//! # Example
//!
//! ```
//! use mcap_video::timing::{plan_cfr, plan_vfr};
//!
//! let timestamps = [0, 100_000_000, 200_000_000];
//! let fps = plan_cfr(&timestamps)?;
//! assert!((fps - 10.0).abs() < 1e-9);
//!
//! let durations = plan_vfr(&[0, 100, 100, 5000]);
//! assert_eq!(durations, vec![100, 100, 1000, 1000]);
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use crate::error::ConvertError;

/// Nanoseconds in one second.
pub const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

/// Frame rate assumed when no positive inter-frame delta is available.
pub const DEFAULT_FALLBACK_FPS: f64 = 30.0;

/// Largest accepted gap, as a multiple of the running reference duration.
pub const MAX_GAP_MULTIPLIER: f64 = 10.0;

/// How frame timing is derived for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// Constant frame rate from the log receipt times of all frames.
    #[default]
    LogTime,
    /// Variable frame rate from each frame's embedded `header.stamp`.
    HeaderStamp,
}

/// The timing applied to the output video.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingPlan {
    /// One frame rate for the whole video.
    Constant {
        /// Frames per second.
        frames_per_second: f64,
    },
    /// One display duration per frame, in nanoseconds.
    Variable {
        /// Per-frame durations; the length equals the frame count.
        durations_ns: Vec<i64>,
    },
}

impl TimingPlan {
    /// Total playback time covered by the plan for `frame_count` frames.
    pub fn total_duration_ns(&self, frame_count: usize) -> i64 {
        match self {
            TimingPlan::Constant { frames_per_second } => {
                (frame_count as f64 / frames_per_second * NANOSECONDS_PER_SECOND as f64) as i64
            }
            TimingPlan::Variable { durations_ns } => durations_ns.iter().sum(),
        }
    }
}

/// Duration used when timing cannot be derived from the data.
pub fn fallback_duration_ns() -> i64 {
    (NANOSECONDS_PER_SECOND as f64 / DEFAULT_FALLBACK_FPS) as i64
}

/// Compute a single frame rate from the full timestamp set.
///
/// The rate is `1e9 / mean(deltas)` where the mean runs over **every** raw
/// delta, non-increasing ones included.
///
/// # Errors
///
/// - [`ConvertError::InsufficientFrames`] for fewer than two timestamps.
/// - [`ConvertError::DegenerateTiming`] if all timestamps are identical or
///   the deltas average to zero or less.
pub fn plan_cfr(timestamps_ns: &[i64]) -> Result<f64, ConvertError> {
    if timestamps_ns.len() < 2 {
        return Err(ConvertError::InsufficientFrames {
            found: timestamps_ns.len(),
        });
    }

    let deltas: Vec<i128> = timestamps_ns
        .windows(2)
        .map(|pair| pair[1] as i128 - pair[0] as i128)
        .collect();

    if deltas.iter().all(|&delta| delta == 0) {
        return Err(ConvertError::DegenerateTiming(
            "all frame timestamps are identical, frame rate is undefined".to_string(),
        ));
    }

    let sum: i128 = deltas.iter().sum();
    if sum == 0 {
        return Err(ConvertError::DegenerateTiming(
            "mean frame interval is zero, frame rate is undefined".to_string(),
        ));
    }
    if sum < 0 {
        return Err(ConvertError::DegenerateTiming(format!(
            "timestamps decrease overall (mean interval {} ns)",
            sum / deltas.len() as i128,
        )));
    }

    let mean_delta = sum as f64 / deltas.len() as f64;
    let frames_per_second = NANOSECONDS_PER_SECOND as f64 / mean_delta;
    log::debug!(
        "CFR plan: {} frames, mean interval {:.0} ns, {:.4} fps",
        timestamps_ns.len(),
        mean_delta,
        frames_per_second,
    );
    Ok(frames_per_second)
}

/// Compute one display duration per frame, clamping outlier gaps.
///
/// The baseline is the median of the positive deltas. Each delta is then
/// judged against a running reference that is replaced by the adjusted delta
/// after every step:
///
/// - a non-increasing delta is replaced by the reference;
/// - a delta above `max(reference * MAX_GAP_MULTIPLIER, reference)` is
///   clamped down to that bound;
/// - anything else is kept.
///
/// `durations[i]` is the adjusted gap from frame `i` to frame `i + 1`; the
/// last frame inherits the final reference, so the result always has one
/// entry per timestamp.
pub fn plan_vfr(timestamps_ns: &[i64]) -> Vec<i64> {
    if timestamps_ns.is_empty() {
        return Vec::new();
    }

    let fallback = fallback_duration_ns();
    if timestamps_ns.len() == 1 {
        return vec![fallback];
    }

    let raw_deltas: Vec<i64> = timestamps_ns
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .collect();
    let positive: Vec<i64> = raw_deltas.iter().copied().filter(|&d| d > 0).collect();
    let mut reference = median(&positive).unwrap_or(fallback);

    let mut durations = Vec::with_capacity(timestamps_ns.len());
    for (offset, &raw_delta) in raw_deltas.iter().enumerate() {
        let index = offset + 1;
        let max_gap = ((reference as f64 * MAX_GAP_MULTIPLIER) as i64).max(reference);

        let adjusted = if raw_delta <= 0 {
            log::warn!(
                "Non-increasing timestamp at frame index {index}. Clamped to {reference} ns."
            );
            reference
        } else if raw_delta > max_gap {
            log::warn!(
                "Large timestamp gap at frame index {index}. Clamped from {raw_delta} ns to {max_gap} ns."
            );
            max_gap
        } else {
            raw_delta
        };

        durations.push(adjusted);
        reference = adjusted;
    }

    durations.push(reference);
    durations
}

/// Median of a set of positive deltas, truncated to whole nanoseconds.
fn median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[middle])
    } else {
        Some(((sorted[middle - 1] as i128 + sorted[middle] as i128) / 2) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[5]), Some(5));
        assert_eq!(median(&[9, 1, 5]), Some(5));
        assert_eq!(median(&[100, 4900]), Some(2500));
    }

    #[test]
    fn fallback_is_thirty_fps() {
        assert_eq!(fallback_duration_ns(), 33_333_333);
    }

    #[test]
    fn total_duration_of_variable_plan() {
        let plan = TimingPlan::Variable {
            durations_ns: vec![100, 200, 300],
        };
        assert_eq!(plan.total_duration_ns(3), 600);
    }
}
