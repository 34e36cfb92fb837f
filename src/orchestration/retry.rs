//! # Retry Policy
//!
//! Per-activity retry with backoff, applied to every batch processor
//! invocation and to the finalize activity independently of the
//! orchestration's own continuation mechanism. A transient failure that
//! succeeds within the budget is invisible to the loop; exhausting the
//! budget fails the cycle.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};

/// Delay function between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately. Used by tests and latency-insensitive activities.
    None,
    /// Constant delay between attempts.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                let delay = base.saturating_mul(1u32 << exponent);
                delay.min(*max)
            }
        }
    }
}

/// Retry budget attached to one activity invocation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Create a policy with at least one attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Backoff::None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `activity` until it succeeds or the attempt budget is exhausted.
    ///
    /// The final error is wrapped in
    /// [`OrchestrationError::RetriesExhausted`] with the attempt count so the
    /// failed activity is identifiable from the run's terminal status.
    pub async fn execute<T, F, Fut>(&self, activity: &str, mut f: F) -> OrchestrationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestrationResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts => {
                    return Err(OrchestrationError::RetriesExhausted {
                        activity: activity.to_string(),
                        attempts: attempt,
                        source: Box::new(error),
                    });
                }
                Err(error) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        activity = activity,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Activity failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_millis(1000),
                max: Duration::from_millis(60_000),
            },
        )
    }
}
