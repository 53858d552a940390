//! Retry logic with exponential backoff
//!
//! Every external call in the pipeline goes through one [`RetryPolicy`]:
//! a bounded number of attempts, an exponential backoff schedule, and a
//! retryable-error predicate supplied by the error type.

use crate::LLMError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    /// Return true for transient failures such as timeouts and throttling
    fn is_retryable(&self) -> bool;
}

impl Retryable for LLMError {
    fn is_retryable(&self) -> bool {
        LLMError::is_retryable(self)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// One bounded retry after two seconds
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Create a policy with fast retries (for testing)
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    /// Backoff to wait before retry number `retry` (1-based); zero for the first attempt
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((retry - 1) as i32);

        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }

    /// Execute an async operation, retrying transient failures
    ///
    /// Returns the first success, the first non-retryable error, or the last
    /// error once all attempts are used.
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Attempt {attempt}/{attempts} for operation: {operation_name}");

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            "Operation '{operation_name}' succeeded after {} retries",
                            attempt - 1
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("Operation '{operation_name}' failed with non-retryable error: {e}");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    warn!("Operation '{operation_name}' failed after {attempts} attempts: {e}");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "Operation '{operation_name}' failed (attempt {attempt}/{attempts}): {e}. Retrying in {backoff:?}"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}
