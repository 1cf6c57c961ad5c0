//! Reconnection policy for abnormal closures.

use std::time::Duration;

/// Exponential backoff with an attempt cap.
///
/// The cap is enforced by `ConnectionManager::connect`, not here: a retry is
/// always scheduled after an abnormal close, and the connect it triggers
/// settles in `Error` once the cap is reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Connect attempts allowed before giving up (0 = unlimited)
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Ceiling for any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor between consecutive retries
    pub backoff_multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// `min(initial * multiplier^retry, max)` in milliseconds.
    pub fn delay_ms(&self, retry: u32) -> u64 {
        let factor = u64::from(self.backoff_multiplier.max(1))
            .checked_pow(retry)
            .unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        Duration::from_millis(self.delay_ms(retry))
    }

    /// Whether `attempts` already made have used up the cap.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}
