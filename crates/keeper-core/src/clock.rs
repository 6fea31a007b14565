//! Domain time source.
//!
//! Bidding windows, execution delays, and timeouts are measured in whole
//! seconds on a [`Clock`]. Production code uses [`SystemClock`]; tests drive a
//! [`ManualClock`] explicitly.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Seconds on the domain clock.
pub type Timestamp = u64;

/// A source of the current domain time.
pub trait Clock: Send + Sync {
    /// Returns the current time in seconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in Unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start`.
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`, saturating at `u64::MAX`.
    pub fn advance(&self, secs: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(secs)));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
