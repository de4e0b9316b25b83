//! Retry with exponential backoff
//!
//! Only errors selected by the caller's predicate are retried; everything
//! else is returned on the spot.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::NetworkRetryConfig;

/// Attempt budget and delay curve for a [`BackoffRetrier`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl From<&NetworkRetryConfig> for RetryPolicy {
    fn from(config: &NetworkRetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

/// Generic retry-with-backoff over async operations
#[derive(Debug, Clone, Default)]
pub struct BackoffRetrier {
    policy: RetryPolicy,
}

impl BackoffRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation`, retrying errors for which `should_retry` holds
    /// until the attempt budget is spent.
    pub async fn retry<F, Fut, T, E, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !should_retry(&error) {
                        debug!(attempt, error = %error, "Non-retryable error");
                        return Err(error);
                    }

                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %error, "Retry budget exhausted");
                        return Err(error);
                    }

                    let wait = delay.min(self.policy.max_delay);
                    warn!(
                        attempt,
                        error = %error,
                        delay_ms = wait.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    sleep(wait).await;

                    delay = delay.mul_f64(self.policy.multiplier).min(self.policy.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}
