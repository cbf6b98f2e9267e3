// Retry-with-backoff for segment and manifest fetches.
//
// Exponential backoff with jitter and a hard delay cap; cancellation is
// checked before every attempt so a dying session never sits in a sleep.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::BeamError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts beyond the initial one.
    pub max_retries: u32,
    /// Base delay; attempt n sleeps `base * 2^n` plus jitter.
    pub base_delay: Duration,
    /// Hard cap on any computed delay.
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return capped;
        }
        let jitter_ms = rand::rng().random_range(0..jitter_range_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Outcome of one attempt, classified by the caller.
pub enum RetryAction<T> {
    Success(T),
    Retry(BeamError),
    Fail(BeamError),
}

/// Run `operation` until it succeeds, permanently fails, exhausts the
/// policy, or the token is cancelled.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, BeamError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut last_err = None;
    for attempt in 0..=policy.max_retries {
        if token.is_cancelled() {
            return Err(BeamError::Cancelled);
        }
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = %err, "retryable failure");
                last_err = Some(err);
                if attempt < policy.max_retries {
                    tokio::select! {
                        _ = token.cancelled() => return Err(BeamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    Err(last_err.unwrap_or(BeamError::Cancelled))
}
