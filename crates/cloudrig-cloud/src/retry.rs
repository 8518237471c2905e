//! Bounded retry driver for provider operations
//!
//! Retry decisions are explicit: an operation returns a [`CloudError`] and
//! the driver reissues it only when [`CloudError::is_retryable`] says so.
//! There is no implicit re-raising; anything non-retryable propagates
//! immediately and the attempt budget is a hard bound.

use crate::error::{CloudError, Result};
use std::time::Duration;

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry without sleeping between attempts. Used by tests and by call
    /// sites whose operations already block on control-plane task polling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Run `op` up to `config.max_attempts` times, retrying only retryable
/// errors, and return the first success or the last error.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    "Attempt {}/{} failed ({}), retrying",
                    attempt,
                    config.max_attempts,
                    err
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                delay = delay
                    .mul_f64(config.backoff_multiplier)
                    .min(config.max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
