//! Retry with exponential backoff for transient venue failures.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::VenueError;

/// Retry policy: a bounded number of attempts under a total delay budget.
///
/// Non-retryable errors surface immediately; `RateLimited` honors the
/// venue's `retry_after` hint when it fits the remaining budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub total_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            total_budget: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based), doubling each time.
    #[must_use]
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `operation`, retrying retryable errors until the attempt count or
    /// the delay budget is exhausted.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, VenueError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let mut spent = Duration::ZERO;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = match &e {
                        VenueError::RateLimited {
                            retry_after: Some(hint),
                        } => *hint,
                        _ => self.delay_for(attempt),
                    };
                    if spent + delay > self.total_budget {
                        return Err(e);
                    }
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying venue call");
                    tokio::time::sleep(delay).await;
                    spent += delay;
                    attempt += 1;
                }
            }
        }
    }
}
