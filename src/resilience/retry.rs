//! Bounded retry with exponential backoff and jitter.

use std::time::Duration;

use anyhow::{anyhow, Result};

use super::ResilienceError;
use crate::shutdown::Shutdown;

/// Retry tuning. The delay before attempt `k` (k >= 2) is
/// `min(initial_delay * multiplier^(k-1), max_delay)`, jittered ±20% when
/// enabled.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Tighter initial delay, more attempts. Used for calls that are cheap
    /// to repeat.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Execute `op` until it succeeds, the retry budget is exhausted, the
    /// failure is classified non-retryable, or `shutdown` is cancelled.
    ///
    /// Cancellation interrupts both in-flight backoff waits and subsequent
    /// attempts, and surfaces as [`ResilienceError::Cancelled`] rather than
    /// an exhaustion error.
    pub fn run<T, F, P>(&self, shutdown: &Shutdown, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: Fn(&anyhow::Error) -> bool,
    {
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            if shutdown.is_cancelled() {
                return Err(ResilienceError::Cancelled.into());
            }

            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !retryable(&e) {
                        return Err(ResilienceError::NonRetryable { cause: e }.into());
                    }
                    last_err = Some(e);
                }
            }

            if attempt >= self.max_attempts {
                break;
            }

            if shutdown.wait_timeout(self.delay_for_attempt(attempt)) {
                return Err(ResilienceError::Cancelled.into());
            }
        }

        // max_attempts == 0 means the loop never ran and there is no error
        // to carry; synthesize one instead of panicking.
        Err(ResilienceError::Exhausted {
            attempts: self.max_attempts,
            cause: last_err.unwrap_or_else(|| anyhow!("retry budget allows zero attempts")),
        }
        .into())
    }

    /// Backoff before the attempt following `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        delay = delay.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // ±20% spread to avoid thundering-herd retries.
            delay *= 1.0 + 0.2 * (2.0 * fastrand::f64() - 1.0);
        }

        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Predicate that retries every failure.
pub fn retry_all(_err: &anyhow::Error) -> bool {
    true
}

/// Predicate that retries everything except circuit-breaker rejections, so
/// an open circuit fails fast instead of burning the retry budget.
pub fn unless_circuit_open(err: &anyhow::Error) -> bool {
    !err.downcast_ref::<ResilienceError>()
        .is_some_and(ResilienceError::is_rejection)
}
