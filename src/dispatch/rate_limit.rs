//! Per-reward trigger throttling
//!
//! A burst of duplicate notifications (seen right after reconnects) must not
//! turn into several physical key presses.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::normalize;

/// Default spacing between two triggers of the same reward
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Remembers when each reward last went through
#[derive(Debug, Default)]
pub struct RateLimiter {
    ledger: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `now` when `key` may trigger again.
    ///
    /// A refused call leaves the ledger untouched.
    pub fn allow(&mut self, key: &str, now: Instant, min_interval: Duration) -> bool {
        let key = normalize(key);
        if let Some(last) = self.ledger.get(&key) {
            if now.saturating_duration_since(*last) < min_interval {
                return false;
            }
        }
        self.ledger.insert(key, now);
        true
    }

    /// Time since `key` last triggered, if ever
    pub fn since_last(&self, key: &str, now: Instant) -> Option<Duration> {
        self.ledger
            .get(&normalize(key))
            .map(|last| now.saturating_duration_since(*last))
    }
}
