use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::config::RetrySection;

use super::error::BrowserResult;

/// Bounded retry with a fixed inter-attempt delay. The driven UI's
/// readiness latency is roughly constant rather than congestion-dependent,
/// so there is no backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }

    pub fn with(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Invokes `operation` up to `max_attempts` times, sleeping the fixed
    /// delay between attempts, and propagates the last failure once every
    /// attempt is spent. Attempts are assumed idempotent against the UI.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    debug!(attempt, error = %error, "interaction failed, retrying");
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
