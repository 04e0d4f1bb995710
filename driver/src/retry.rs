//! Retry policy: exponential backoff with jitter, `Retry-After` handling.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// How many times a logical request is attempted and how long to wait in
/// between.
///
/// `max_retries` is the total number of attempts, so a perpetually failing
/// transient endpoint is hit exactly `max_retries` times. One logical call
/// therefore blocks for at most [`RetryPolicy::worst_case_latency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            jitter: true
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based
    /// number of the attempt that just failed:
    /// `min(base * 2^(attempt-1), cap) + jitter`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self
            .base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        exponential + self.jitter_delay()
    }

    /// Delay honoring a server-provided `Retry-After`, clamped to the cap.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_backoff),
            None => self.backoff_delay(attempt)
        }
    }

    /// Upper bound on the wall time of one logical call, excluding any
    /// client-side throttle wait.
    pub fn worst_case_latency(&self, timeout: Duration) -> Duration {
        let attempts = self.max_retries.max(1);
        let sleeps = attempts - 1;
        let max_sleep = self.max_backoff + self.max_jitter();
        timeout * attempts + max_sleep * sleeps
    }

    fn max_jitter(&self) -> Duration {
        if self.jitter {
            self.base_backoff / 2
        } else {
            Duration::ZERO
        }
    }

    fn jitter_delay(&self) -> Duration {
        let max = self.max_jitter();
        if max.is_zero() {
            return Duration::ZERO;
        }
        max.mul_f64(rand::random::<f64>())
    }
}

/// Parses a `Retry-After` header: delta-seconds or an HTTP-date.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
