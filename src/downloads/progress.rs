//! Download progress tracking
//!
//! Percentages are floored, never decrease, and are rate limited so a fast
//! transfer does not flood the caller. `100` is held back until the
//! download has been fully validated and is reported exactly once.

use std::time::{Duration, Instant};

/// Default minimum spacing between two progress reports
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Floor of `bytes / total * 100`, clamped to 100
pub fn percent(bytes: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (bytes as u128 * 100) / total as u128;
    pct.min(100) as u8
}

#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: Option<u8>,
    completed: bool,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_percent: None,
            completed: false,
        }
    }

    /// Record progress after a chunk; returns the percentage to report, if any
    pub fn observe(&mut self, bytes: u64, total: u64) -> Option<u8> {
        self.observe_at(bytes, total, Instant::now())
    }

    pub fn observe_at(&mut self, bytes: u64, total: u64, now: Instant) -> Option<u8> {
        if self.completed {
            return None;
        }

        let pct = percent(bytes, total);
        if pct >= 100 {
            return None;
        }
        if self.last_percent.is_some_and(|last| pct <= last) {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }

        self.last_emit = Some(now);
        self.last_percent = Some(pct);
        Some(pct)
    }

    /// The terminal 100%; `Some` only on the first call
    pub fn complete(&mut self) -> Option<u8> {
        if self.completed {
            return None;
        }
        self.completed = true;
        self.last_percent = Some(100);
        Some(100)
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}
