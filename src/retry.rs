use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// How often and how long to back off between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_wait: Duration,
    pub error_wait: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            rate_limit_wait: Duration::from_secs_f64(config.rate_limit_wait_secs),
            error_wait: Duration::from_secs_f64(config.error_wait_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// A non rate-limit error on the final attempt
    #[error("{0}")]
    Failed(E),
    /// Every attempt ended in a rate-limit error
    #[error("maximum attempts reached ({attempts})")]
    Exhausted { attempts: u32 },
}

/// Whether an error's text marks it as a rate-limit rejection
pub fn is_rate_limited(error: &impl Display) -> bool {
    let text = error.to_string();
    text.contains("429") || text.to_lowercase().contains("rate limit")
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// Rate-limit errors wait `rate_limit_wait` and are never re-raised themselves;
/// other errors wait `error_wait` and are returned from the final attempt.
/// Both classes count against the same budget. The operation receives the
/// 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    for attempt in 1..=policy.max_attempts {
        let last_attempt = attempt == policy.max_attempts;
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if is_rate_limited(&e) => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_secs = policy.rate_limit_wait.as_secs_f64(),
                    "rate limit reached"
                );
                if !last_attempt {
                    sleep(policy.rate_limit_wait).await;
                }
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts = policy.max_attempts, error = %e, "request failed");
                if last_attempt {
                    return Err(RetryError::Failed(e));
                }
                sleep(policy.error_wait).await;
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
    })
}
