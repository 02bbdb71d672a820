//! Exponential backoff and bounded retry.
//!
//! [`Backoff`] tracks a consecutive-failure streak and reports how long the
//! caller should wait; it never sleeps itself. [`retry_with_backoff`] wraps
//! an async operation in a fixed number of attempts, sleeping between them
//! but waking immediately when its cancellation token fires.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capped exponential backoff: `min(max, base * 2^(n-1))` after `n` failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    consecutive_errors: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: 0.0,
            consecutive_errors: 0,
        }
    }

    /// Spread each delay uniformly over `±fraction` of its value.
    ///
    /// The fraction is clamped to `[0, 1)`.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 0.99)
        } else {
            0.0
        };
        self
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn on_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let delay = self.delay_for(self.consecutive_errors);
        if self.jitter > 0.0 {
            let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Un-jittered delay after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        // 2^31 already overflows any realistic base; cap the shift.
        let exp = (failures - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Bounded retry schedule for one-off setup calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

/// Outcome of a failed [`retry_with_backoff`] call.
#[derive(Debug)]
pub enum RetryError {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: anyhow::Error },
    /// The token fired before an attempt succeeded.
    Cancelled,
}

/// Wait for `delay`, returning `false` if `token` fired first.
pub async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run `op` up to `policy.attempts` times with exponential waits in between.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay).with_jitter(policy.jitter);

    for attempt in 1..=attempts {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == attempts => {
                tracing::error!(what, attempts, error = %e, "retries exhausted");
                return Err(RetryError::Exhausted { attempts, last: e });
            }
            Err(e) => {
                let delay = backoff.on_failure();
                tracing::warn!(
                    what,
                    attempt,
                    attempts,
                    error = %e,
                    "attempt failed; retrying in {:.2}s",
                    delay.as_secs_f64()
                );
                if !sleep_or_cancel(token, delay).await {
                    return Err(RetryError::Cancelled);
                }
            }
        }
    }

    Err(RetryError::Cancelled)
}
