// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! The loop itself knows nothing about connections: the caller supplies the
//! attempt and a predicate deciding which errors are worth another try.
//!
//! # Example
//!
//! ```
//! use tiered_cache::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(config.max_retries, Some(3));
//! assert_eq!(config.initial_delay, Duration::from_millis(100));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts; `None` retries forever
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }
}

/// Why a retried operation finally failed.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made, including the last one
    pub attempts: usize,
    /// True when the attempt budget ran out; false when the predicate
    /// refused to retry
    pub exhausted: bool,
    pub error: E,
}

/// Run `operation` until it succeeds, `should_retry` rejects an error, or the
/// attempt budget is spent.
pub async fn retry<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                let delay = config.delay_after(attempts);

                if !should_retry(&err) {
                    warn!(
                        "Operation '{}' failed (attempt {}) with a non-retryable error: {}",
                        operation_name, attempts, err
                    );
                    return Err(RetryFailure { attempts, exhausted: false, error: err });
                }

                match config.max_retries {
                    Some(max) if attempts >= max => {
                        return Err(RetryFailure { attempts, exhausted: true, error: err });
                    }
                    Some(max) => {
                        warn!(
                            "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                            operation_name, attempts, max, err, delay
                        );
                    }
                    None => {
                        warn!(
                            "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                            operation_name, attempts, err, delay
                        );
                    }
                }

                sleep(delay).await;
            }
        }
    }
}
