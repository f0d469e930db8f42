//! Fixed-window attempt counter used by the ephemeral limiter.

use chrono::{DateTime, Utc};

use crate::clock::add_secs;

/// Counts attempts within a window that opens at the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounter {
    /// Attempts consumed in the current window
    count: u32,
    /// When the current window opened
    window_start: DateTime<Utc>,
    /// Window length in seconds
    window_secs: u64,
}

impl WindowCounter {
    /// Open a fresh window at `now`.
    pub fn new(now: DateTime<Utc>, window_secs: u64) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_secs,
        }
    }

    /// Count one attempt if the limit allows it.
    ///
    /// Returns `true` if the attempt is within the limit, `false` if over it.
    /// Rejected attempts are not counted.
    pub fn try_increment(&mut self, now: DateTime<Utc>, limit: u32) -> bool {
        self.maybe_reset_window(now);

        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }

    /// Attempts consumed in the window that is current at `now`.
    pub fn current_count(&mut self, now: DateTime<Utc>) -> u32 {
        self.maybe_reset_window(now);
        self.count
    }

    /// Attempts left before the limit.
    pub fn remaining(&mut self, now: DateTime<Utc>, limit: u32) -> u32 {
        limit.saturating_sub(self.current_count(now))
    }

    /// When the current window closes.
    pub fn window_end(&self) -> DateTime<Utc> {
        add_secs(self.window_start, self.window_secs)
    }

    /// Whether the window has closed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end()
    }

    fn maybe_reset_window(&mut self, now: DateTime<Utc>) {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
        }
    }
}
