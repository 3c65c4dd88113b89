//! Retry policy with exponential backoff and jitter

use std::time::Duration;

use rand::Rng;

use crate::config::Configuration;

/// Status codes that warrant another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Fraction of the base delay added or removed by jitter
const JITTER_FRACTION: f64 = 0.25;

/// Longest server-requested wait honoured (1 hour)
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Check if an HTTP status is retryable
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Parse a `Retry-After` header given in seconds (integer or fractional)
///
/// HTTP-date values, negative numbers and values longer than
/// [`MAX_RETRY_AFTER`] are ignored, leaving the computed backoff in charge.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|delay| *delay <= MAX_RETRY_AFTER)
}

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay before retrying after `attempt` (1-based)
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        Duration::from_secs_f64(secs.min(max))
    }

    /// Jittered delay before retrying after `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range(-1.0..=1.0);
        self.jittered(self.base_delay_for(attempt), factor)
    }

    /// Apply `factor` (in `[-1, 1]`) of the jitter range to `delay`, clamped to `[0, max_delay]`
    pub fn jittered(&self, delay: Duration, factor: f64) -> Duration {
        let secs = delay.as_secs_f64();
        let jittered = secs + secs * JITTER_FRACTION * factor.clamp(-1.0, 1.0);
        Duration::from_secs_f64(jittered.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}
