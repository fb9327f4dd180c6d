//! Sliding-window rate limiting keyed by tool name.
//!
//! The check is non-blocking: a call over the limit fails immediately and the
//! caller decides whether to back off. Rejected calls are not counted.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Tracks recent admissions per key within a fixed-length window.
pub struct RateLimiter {
    window: Duration,
    admissions: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter with the usual one-minute window.
    pub fn per_minute() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            admissions: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit one call for `key` if fewer than `limit` were admitted in the window.
    ///
    /// On rejection returns how long until the oldest admission leaves the window.
    pub fn try_acquire(&self, key: &str, limit: u32) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.admissions.entry(key.to_string()).or_default();

        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= limit as usize {
            let retry_after = entry
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        entry.push_back(now);
        Ok(())
    }

    /// Number of admissions currently inside the window for `key`.
    pub fn in_window(&self, key: &str) -> usize {
        let now = Instant::now();
        self.admissions
            .get(key)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute()
    }
}
