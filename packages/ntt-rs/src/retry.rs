//! Bounded retry and polling
//!
//! Two helpers share every network call site:
//!
//! - [`with_retry`] re-runs an operation that failed with a transient error,
//!   sleeping with capped exponential backoff plus jitter.
//! - [`poll_until`] re-runs an operation until it produces a value, at a fixed
//!   interval, and gives up with [`NttError::Timeout`].
//!
//! Both stop immediately on errors that are not transient and both surface
//! the underlying error once attempts are exhausted.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{NttError, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
    /// Random spread applied to each backoff, as a fraction (0.0..=1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed), without
    /// jitter
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Backoff with ±`jitter` applied, never above `max_backoff`
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_for_attempt(attempt).as_secs_f64();
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        let jittered = (base * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Fixed-interval polling bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollSchedule {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Whether a chain client error message describes a temporary failure
pub fn is_transient_message(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    // Permanent failures win over generic network words in the same message
    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("invalid parameters")
        || error_lower.contains("already executed")
    {
        return false;
    }

    error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
}

/// Execute with retry logic
///
/// `operation` receives the 0-indexed attempt number. Only transient errors
/// are retried; anything else, or the last transient error once
/// `max_retries` is reached, is returned unchanged.
pub async fn with_retry<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_transient() {
                    debug!(attempt, error = %e, "Permanent error, not retrying");
                    return Err(e);
                }
                if !config.should_retry(attempt) {
                    warn!(attempt, max = config.max_retries, error = %e, "Retries exhausted");
                    return Err(e);
                }
                let backoff = config.jittered_backoff(attempt);
                attempt += 1;
                warn!(
                    attempt,
                    max = config.max_retries,
                    ?backoff,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Poll until `operation` yields `Some`.
///
/// Transient errors count as an unsuccessful attempt; other errors end the
/// poll immediately. Exhausting the schedule returns `Timeout`.
pub async fn poll_until<F, T, Fut>(schedule: &PollSchedule, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..schedule.max_attempts {
        match operation(attempt).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                debug!(attempt, max = schedule.max_attempts, "Not ready yet");
            }
            Err(e) if e.is_transient() => {
                warn!(attempt, max = schedule.max_attempts, error = %e, "Transient error while polling");
            }
            Err(e) => return Err(e),
        }
        if attempt + 1 < schedule.max_attempts {
            tokio::time::sleep(schedule.interval).await;
        }
    }
    Err(NttError::Timeout {
        attempts: schedule.max_attempts,
    })
}
