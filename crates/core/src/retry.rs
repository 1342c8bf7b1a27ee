//! Bounded retry with exponential backoff.
//!
//! Used to deliver the init message, which can race the agent's own startup:
//! the transport may accept the connection before the agent's handler is able
//! to take the first message.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Smallest delay used between attempts.
const MIN_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every later attempt.
    pub base_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the 1-based `attempt`.
    ///
    /// The first attempt runs immediately; every later attempt waits a non-zero,
    /// non-decreasing delay.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
            .max(MIN_BACKOFF)
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("retry cancelled")]
    Cancelled,
}

/// Runs `operation` until it succeeds, the policy is exhausted, or `cancel` fires.
///
/// The closure receives the 1-based attempt number. Cancellation is checked
/// before every attempt and while waiting out a backoff.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = policy.backoff_for_attempt(attempt);
        if !delay.is_zero() {
            debug!(attempt, ?delay, "Backing off before retry");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(last_error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                attempt += 1;
            }
        }
    }
}
