//! Retry utilities for resilient operations
//!
//! Exponential backoff used by persistence commits, the coordinator client and
//! webhook delivery.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff schedule: no delay before the first attempt, then
/// `base_delay_ms * 2^(n-1)` before retry `n`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::with_delays(0, 0, 0)
    }

    /// Total attempts including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn delay_before(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Returns the first success, or the last error once `max_retries` retries are spent.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, operation, |_| true).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Errors for which `should_retry` returns false are returned immediately.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_before(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed"
                );

                if attempt >= config.max_retries {
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}
