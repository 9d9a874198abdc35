//! Timeout and retry wrapper for database calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::error::{DbError, DbResult};
use crate::config::RunConfig;

/// Retry policy applied to every database call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled per retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay (before jitter).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_run_config(&RunConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            timeout: config.query_timeout,
            max_retries: config.max_retries,
            initial_delay: config.retry_backoff,
            max_delay: Duration::from_secs(30),
        }
    }

    /// No retries; only the timeout applies.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// The same timeout with a single attempt, for statements that are not
    /// safe to repeat once they may have been applied.
    pub fn single_attempt(&self) -> Self {
        Self::no_retry(self.timeout)
    }

    /// Backoff before retry `attempt` (0-based), with up to 50% random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (base.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Run `operation` under the timeout, retrying retriable failures.
    ///
    /// Non-retriable errors return immediately. After the last attempt the
    /// final error is returned unchanged.
    pub async fn call<T, F, Fut>(&self, what: &str, mut operation: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(r) => r,
                Err(_) => Err(DbError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying database call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
