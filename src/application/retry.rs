use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::error::InfraError;
use std::future::Future;
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        )
    }
}

#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, InfraError>,
    pub attempts: u32,
}

/// Bounds a single external call; elapsing counts as an `InfraError::Timeout`.
pub async fn with_timeout<T, F>(timeout_ms: u64, future: F) -> Result<T, InfraError>
where
    F: Future<Output = Result<T, InfraError>>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => result,
        Err(_) => Err(InfraError::Timeout(timeout_ms)),
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Each attempt is bounded by `timeout_ms`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    timeout_ms: u64,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match with_timeout(timeout_ms, operation()).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt + 1,
                };
            }
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                tracing::debug!(attempt = attempt + 1, error = %error, "retrying external call");
                sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(error) => {
                return Attempted {
                    result: Err(error),
                    attempts: attempt + 1,
                };
            }
        }
    }
}
