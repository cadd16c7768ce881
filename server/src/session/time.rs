//! Time source abstraction for session expiry.
//!
//! Production code reads the system clock; tests drive a `ManualTimeSource`
//! forward explicitly so expiry is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the current time.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Real time source using the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[allow(clippy::cast_possible_truncation)] // u64 milliseconds last for millions of years
    fn now_ms(&self) -> u64 {
        // A clock set before 1970 reads as the epoch
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis() as u64)
    }
}

/// A time source that only moves when told to.
///
/// Safe to share across threads, so it can back a registry whose eviction
/// task runs on the tokio runtime.
#[derive(Debug)]
pub struct ManualTimeSource {
    current_time_ms: AtomicU64,
}

impl ManualTimeSource {
    #[must_use]
    pub const fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: AtomicU64::new(initial_time_ms),
        }
    }

    /// Advance time by `ms`, saturating at `u64::MAX`.
    pub fn advance(&self, ms: u64) {
        let _ = self
            .current_time_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(ms))
            });
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}
