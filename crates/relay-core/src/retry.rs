//! # Send Retry
//!
//! Backoff schedule for the outbound send loop.
//!
//! A failed send waits either for the broker's own `retry_after` hint or for
//! an exponential delay, whichever applies, and never longer than
//! [`RetryPolicy::max_delay`]. Exponential delays carry jitter so emitters
//! recovering from the same broker outage spread their retries out.

use rand::Rng;
use relay_runtime::TransportError;
use std::time::Duration;

/// Backoff settings for retrying transient send failures
///
/// # Examples
///
/// ```rust
/// use relay_core::retry::RetryPolicy;
/// use relay_runtime::TransportError;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2), 2.0)
///     .without_jitter();
///
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
///
/// // A broker hint is honoured but bounded by max_delay
/// let hinted = TransportError::ConnectionFailed { message: "reset".to_string() };
/// assert_eq!(policy.delay_for(&hinted, 0), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_attempts: u32,

    pub initial_delay: Duration,

    /// Upper bound for any single wait, including broker hints
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    pub use_jitter: bool,

    /// Fraction of the delay used as jitter range (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(16), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Exponential delay for retry `attempt` (0-based), capped then jittered
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.use_jitter {
            Duration::from_secs_f64(jittered(capped, self.jitter_percent))
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Wait before retrying after `err` on retry `attempt`
    ///
    /// The broker's `retry_after` hint wins over the exponential schedule;
    /// both are bounded by `max_delay`.
    pub fn delay_for(&self, err: &TransportError, attempt: u32) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.calculate_delay(attempt),
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Random point in `[delay * (1 - fraction), delay * (1 + fraction)]`
fn jittered(delay_secs: f64, fraction: f64) -> f64 {
    let range = delay_secs * fraction;
    if range <= 0.0 {
        return delay_secs;
    }
    (delay_secs + rand::thread_rng().gen_range(-range..=range)).max(0.0)
}

/// Progress of one message through its retries
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Retries taken so far (0 before the first retry)
    pub attempt: u32,

    /// Sends made so far, the first one included
    pub total_attempts: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            total_attempts: 1,
        }
    }

    pub fn next_attempt(&mut self) {
        self.attempt += 1;
        self.total_attempts += 1;
    }

    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempt)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
