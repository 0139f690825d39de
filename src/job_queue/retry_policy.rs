//! Retry policy for failed transcode attempts.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::QueueSettings;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt ceiling: a job is failed permanently once this many attempts
    /// have been delivered.
    pub max_attempts: i32,
    /// Backoff after the first failed attempt, in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to the backoff after each further attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(config: &QueueSettings) -> Self {
        Self {
            max_attempts: config.max_attempts as i32,
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Check whether another delivery should be scheduled after a failure.
    ///
    /// `attempt_count` is the number of attempts already delivered, including
    /// the one that just failed. Non-retryable failures (payload validation)
    /// never get another delivery.
    pub fn should_retry(&self, retryable: bool, attempt_count: i32) -> bool {
        retryable && attempt_count < self.max_attempts
    }

    /// Backoff duration in seconds after the given attempt.
    ///
    /// Attempt 1 waits `initial_backoff_secs`; each further attempt
    /// multiplies by `backoff_multiplier`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, attempt_count: i32) -> u64 {
        let exponent = (attempt_count - 1).max(0);
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Unix timestamp (seconds) at which the next retry may be claimed.
    pub fn next_retry_at(&self, attempt_count: i32) -> i64 {
        chrono::Utc::now().timestamp() + self.backoff_secs(attempt_count) as i64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&QueueSettings::default())
    }
}
