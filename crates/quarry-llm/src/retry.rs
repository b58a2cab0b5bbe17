use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::LlmError;

/// Bounded exponential-backoff retry applied to provider calls.
///
/// Only [transient](LlmError::is_transient) errors are retried. A provider-supplied
/// `Retry-After` takes precedence over the computed backoff; both are capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Backoff before retry number `attempt + 1` (`attempt` is zero-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, error: &LlmError, attempt: u32) -> Duration {
        match error {
            LlmError::RateLimited {
                retry_after: Some(d),
            } => (*d).min(self.max_delay),
            _ => self.backoff(attempt),
        }
    }

    /// Run `f` until it succeeds, fails fatally, or `max_attempts` is reached.
    ///
    /// The backoff sleep between attempts ends early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, the last transient error once attempts are exhausted,
    /// or [`LlmError::Cancelled`] if `cancel` fires while waiting to retry.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(&e, attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient provider error, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            tracing::debug!(operation, "retry abandoned, cancelled during backoff");
                            return Err(LlmError::Cancelled);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(operation, attempts = attempt + 1, error = %e, "retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
