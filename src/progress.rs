//! Progress reporting for conversions.
//!
//! A conversion reports through a [`ProgressCallback`]. During the scan the
//! frame total is unknown, so a [`ScanTicker`] thread polls the live frame
//! counter every 100 ms and reports it; during decoding a
//! [`ProgressTracker`] reports after every emitted frame.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcap_video::{ConversionPhase, ConvertOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         match (info.phase, info.percentage) {
//!             (ConversionPhase::Scanning, _) => println!("scanned {} frames", info.current),
//!             (_, Some(pct)) => println!("{pct:.1}% complete"),
//!             _ => {}
//!         }
//!     }
//! }
//!
//! let options = ConvertOptions::new().with_progress(Arc::new(PrintProgress));
//! mcap_video::convert("recording.mcap", "/camera/image", "out.mp4", &options)?;
//! # Ok::<(), mcap_video::ConvertError>(())
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often the scan ticker polls the frame counter.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which part of the conversion is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConversionPhase {
    /// Pass 1: collecting timestamps.
    Scanning,
    /// Pass 2: decoding and emitting frames.
    Converting,
    /// Final encoding (trailer write or encoder subprocess).
    Encoding,
}

/// A snapshot of conversion progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub phase: ConversionPhase,
    /// Frames scanned (pass 1) or emitted (pass 2) so far.
    pub current: u64,
    /// Total frames, once the scan has counted them.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Wall-clock time since the phase started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Latest memory estimate in bytes, when one has been sampled.
    pub memory_bytes: Option<u64>,
}

/// Receives progress updates.
///
/// Must be [`Send`] and [`Sync`]: scan updates arrive from the ticker
/// thread.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all updates. The default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Reports pass 2 progress after every frame.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    phase: ConversionPhase,
    total: Option<u64>,
    current: u64,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        phase: ConversionPhase,
        total: Option<u64>,
    ) -> Self {
        Self {
            callback,
            phase,
            total,
            current: 0,
            start_time: Instant::now(),
        }
    }

    /// Record one emitted frame and report.
    pub(crate) fn advance(&mut self, memory_bytes: Option<u64>) {
        self.current += 1;
        self.report(memory_bytes);
    }

    /// Switch phase, keeping the count and the clock.
    pub(crate) fn enter(&mut self, phase: ConversionPhase, memory_bytes: Option<u64>) {
        self.phase = phase;
        self.report(memory_bytes);
    }

    fn report(&self, memory_bytes: Option<u64>) {
        let elapsed = self.start_time.elapsed();
        let percentage = self
            .total
            .filter(|&total| total > 0)
            .map(|total| (self.current as f32 / total as f32) * 100.0);
        let estimated_remaining = if self.current > 0 {
            self.total.map(|total| {
                let remaining = total.saturating_sub(self.current);
                elapsed.mul_f64(remaining as f64 / self.current as f64)
            })
        } else {
            None
        };

        self.callback.on_progress(&ProgressInfo {
            phase: self.phase,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            memory_bytes,
        });
    }
}

/// Background thread reporting the scan counter.
///
/// Dropping the ticker stops and joins the thread, so it never outlives the
/// scan, whichever way the scan ends.
pub(crate) struct ScanTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScanTicker {
    pub(crate) fn start(counter: Arc<AtomicU64>, callback: Arc<dyn ProgressCallback>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let start_time = Instant::now();
            let report = |current| {
                callback.on_progress(&ProgressInfo {
                    phase: ConversionPhase::Scanning,
                    current,
                    total: None,
                    percentage: None,
                    elapsed: start_time.elapsed(),
                    estimated_remaining: None,
                    memory_bytes: None,
                });
            };
            while !thread_stop.load(Ordering::Acquire) {
                report(counter.load(Ordering::Relaxed));
                thread::park_timeout(SCAN_POLL_INTERVAL);
            }
            report(counter.load(Ordering::Relaxed));
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for it.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("Scan progress thread panicked");
            }
        }
    }
}

impl Drop for ScanTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressInfo>>);

    impl ProgressCallback for Recorder {
        fn on_progress(&self, info: &ProgressInfo) {
            self.0.lock().unwrap().push(info.clone());
        }
    }

    #[test]
    fn tracker_reports_every_frame() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = ProgressTracker::new(recorder.clone(), ConversionPhase::Converting, Some(4));
        tracker.advance(None);
        tracker.advance(Some(42));
        let reports = recorder.0.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].current, 2);
        assert_eq!(reports[1].percentage, Some(50.0));
        assert_eq!(reports[1].memory_bytes, Some(42));
    }

    #[test]
    fn ticker_reports_final_count_on_stop() {
        let recorder = Arc::new(Recorder::default());
        let counter = Arc::new(AtomicU64::new(0));
        let mut ticker = ScanTicker::start(counter.clone(), recorder.clone());
        counter.store(17, Ordering::Relaxed);
        ticker.stop();
        let reports = recorder.0.lock().unwrap();
        let last = reports.last().expect("at least one report");
        assert_eq!(last.phase, ConversionPhase::Scanning);
        assert_eq!(last.current, 17);
    }

    #[test]
    fn dropping_ticker_joins_thread() {
        let recorder = Arc::new(Recorder::default());
        let ticker = ScanTicker::start(Arc::new(AtomicU64::new(3)), recorder.clone());
        drop(ticker);
        let count = recorder.0.lock().unwrap().len();
        thread::sleep(SCAN_POLL_INTERVAL * 2);
        assert_eq!(recorder.0.lock().unwrap().len(), count);
    }
}
