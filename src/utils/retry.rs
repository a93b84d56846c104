// Opt-in retry for any async call
// Author: kelexine (https://github.com/kelexine)

use crate::config::RetryConfig;
use crate::error::Result;
use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the wait between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows by one fixed step per attempt (`delay * attempt`).
    #[default]
    Linear,
    /// Exponential backoff with jitter, capped at 30s.
    Exponential,
}

/// Bound and pacing for `with_retry`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
            strategy: config.strategy,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> Box<dyn Backoff + Send> {
        match self.strategy {
            RetryStrategy::Fixed | RetryStrategy::Linear => Box::new(Constant::new(self.delay)),
            RetryStrategy::Exponential => Box::new(create_backoff(self.delay)),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    fn delay_after(&self, attempt: u32, backoff: &mut dyn Backoff) -> Duration {
        let step = backoff.next_backoff().unwrap_or(self.delay);
        match self.strategy {
            RetryStrategy::Linear => step * attempt,
            _ => step,
        }
    }
}

/// Create exponential backoff configuration for retries
pub fn create_backoff(initial: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        randomization_factor: 0.3,
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Determine if an HTTP status code is retryable
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Execute an operation, retrying retryable failures until `max_attempts` is reached.
///
/// Offline, cancelled and client-side (4xx) failures are returned immediately.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    if attempt > 1 {
                        warn!(
                            "{} giving up after {} attempts: {}",
                            operation_name, attempt, err
                        );
                    }
                    return Err(err);
                }

                let delay = policy.delay_after(attempt, backoff.as_mut());
                debug!(
                    "{} failed with {} (attempt {}), retrying after {}ms",
                    operation_name,
                    err.code(),
                    attempt,
                    delay.as_millis()
                );
                crate::metrics::record_retry(operation_name);

                tokio::time::sleep(delay).await;
            }
        }
    }
}
