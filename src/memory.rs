//! Memory-pressure guard for the decode/emit pass.
//!
//! Every `interval` emitted frames the [`MemoryGuard`] samples a
//! [`MemoryProbe`]. The first time usage exceeds the estimated limit it asks
//! a [`Confirm`] implementation whether to continue; declining turns into
//! [`ConvertError::AbortedByUser`]. The question is asked at most once per
//! run.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use mcap_video::{Confirm, MemoryGuard, MemoryProbe, MemorySnapshot};
//!
//! struct Fixed(u64);
//! impl MemoryProbe for Fixed {
//!     fn snapshot(&self) -> Option<MemorySnapshot> {
//!         Some(MemorySnapshot { used_bytes: self.0, available_bytes: 1_000, total_bytes: 2_000 })
//!     }
//! }
//!
//! struct Decline;
//! impl Confirm for Decline {
//!     fn confirm(&self, _message: &str) -> bool {
//!         false
//!     }
//! }
//!
//! let mut guard = MemoryGuard::new(Arc::new(Fixed(900)), Arc::new(Decline), 10);
//! assert!(guard.check(5).is_ok());
//! assert!(guard.check(10).is_err());
//! ```

use std::sync::{Arc, Mutex};

use sysinfo::{Pid, System};

use crate::error::ConvertError;

/// Share of available memory the process may use before the guard warns.
pub const AVAILABLE_MEMORY_FRACTION: f64 = 0.8;

/// Share of total memory used as the limit when available memory is unknown.
pub const TOTAL_MEMORY_FALLBACK_FRACTION: f64 = 0.5;

/// Frames between two memory checks by default.
pub const DEFAULT_CHECK_INTERVAL: u64 = 100;

const BYTES_PER_MEBIBYTE: u64 = 1024 * 1024;

/// One memory measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySnapshot {
    /// Resident memory of this process plus its child processes.
    pub used_bytes: u64,
    /// Memory the host reports as available.
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySnapshot {
    /// Usage above which the guard warns.
    pub fn limit_bytes(&self) -> u64 {
        if self.available_bytes > 0 {
            (self.available_bytes as f64 * AVAILABLE_MEMORY_FRACTION) as u64
        } else {
            (self.total_bytes as f64 * TOTAL_MEMORY_FALLBACK_FRACTION) as u64
        }
    }

    pub fn exceeds_limit(&self) -> bool {
        let limit = self.limit_bytes();
        limit > 0 && self.used_bytes > limit
    }
}

/// Source of memory measurements.
pub trait MemoryProbe: Send + Sync {
    /// Measure now; `None` if the platform cannot tell.
    fn snapshot(&self) -> Option<MemorySnapshot>;
}

/// Asks whether to continue after a low-memory warning.
pub trait Confirm: Send + Sync {
    /// Return `true` to continue.
    fn confirm(&self, message: &str) -> bool;
}

/// Always continues. The default for library use, where there is no one to
/// ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&self, message: &str) -> bool {
        log::warn!("{message} Continuing without confirmation.");
        true
    }
}

/// [`MemoryProbe`] backed by `sysinfo`.
///
/// Sums the resident memory of the current process and every process whose
/// parent it is, so an encoder subprocess counts toward usage.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for SystemMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryProbe")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        system.refresh_processes();

        let used_bytes = system
            .processes()
            .iter()
            .filter(|(id, process)| **id == pid || process.parent() == Some(pid))
            .map(|(_, process)| process.memory())
            .sum();

        Some(MemorySnapshot {
            used_bytes,
            available_bytes: system.available_memory(),
            total_bytes: system.total_memory(),
        })
    }
}

/// Samples memory every `interval` frames and asks once when it runs low.
pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    confirm: Arc<dyn Confirm>,
    interval: u64,
    warned: bool,
    last_bytes: Option<u64>,
    peak_bytes: Option<u64>,
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("interval", &self.interval)
            .field("warned", &self.warned)
            .field("last_bytes", &self.last_bytes)
            .field("peak_bytes", &self.peak_bytes)
            .finish_non_exhaustive()
    }
}

impl MemoryGuard {
    /// An `interval` of zero disables checking.
    pub fn new(probe: Arc<dyn MemoryProbe>, confirm: Arc<dyn Confirm>, interval: u64) -> Self {
        Self {
            probe,
            confirm,
            interval,
            warned: false,
            last_bytes: None,
            peak_bytes: None,
        }
    }

    /// Check after `frames_emitted` frames.
    ///
    /// Returns the latest memory estimate, sampled now if this frame count
    /// falls on the interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::AbortedByUser`] if usage is over the limit
    /// for the first time and the confirmation is declined.
    pub fn check(&mut self, frames_emitted: u64) -> Result<Option<u64>, ConvertError> {
        if self.interval == 0 || frames_emitted == 0 || frames_emitted % self.interval != 0 {
            return Ok(self.last_bytes);
        }
        let Some(snapshot) = self.probe.snapshot() else {
            return Ok(self.last_bytes);
        };

        self.last_bytes = Some(snapshot.used_bytes);
        self.peak_bytes = Some(self.peak_bytes.unwrap_or(0).max(snapshot.used_bytes));
        log::debug!(
            "Memory after {frames_emitted} frames: {} MiB used, {} MiB limit",
            snapshot.used_bytes / BYTES_PER_MEBIBYTE,
            snapshot.limit_bytes() / BYTES_PER_MEBIBYTE
        );

        if self.warned || !snapshot.exceeds_limit() {
            return Ok(self.last_bytes);
        }
        self.warned = true;
        let message = format!(
            "Memory usage is {} MiB, above the estimated limit of {} MiB ({} MiB available).",
            snapshot.used_bytes / BYTES_PER_MEBIBYTE,
            snapshot.limit_bytes() / BYTES_PER_MEBIBYTE,
            snapshot.available_bytes / BYTES_PER_MEBIBYTE
        );
        log::warn!("{message}");
        if self.confirm.confirm(&message) {
            Ok(self.last_bytes)
        } else {
            Err(ConvertError::AbortedByUser)
        }
    }

    /// Whether the low-memory warning has fired.
    pub fn has_warned(&self) -> bool {
        self.warned
    }

    /// Highest usage sampled so far.
    pub fn peak_bytes(&self) -> Option<u64> {
        self.peak_bytes
    }
}
