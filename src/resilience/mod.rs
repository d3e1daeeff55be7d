//! Resilience decorators for outbound calls.
//!
//! Any call that leaves the process (embedding generation, AI completion)
//! goes through this layer: bounded retry with exponential backoff, and a
//! circuit breaker that stops hammering a failing dependency. The two
//! compose as retry(breaker(op)), with breaker rejections classified as
//! non-retryable so an open circuit fails fast.

mod breaker;
mod retry;

pub use breaker::{
    BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, ResilientExecutor, StateChangeHook,
};
pub use retry::{retry_all, unless_circuit_open, RetryPolicy};

use thiserror::Error;

/// Distinguished failure modes of the resilience layer.
///
/// Callers match on these (through `anyhow::Error::downcast_ref`) to tell a
/// rejected call apart from a failed one, and a cancelled call apart from an
/// exhausted retry budget.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The retry budget ran out; `cause` is the final attempt's error.
    #[error("operation failed after {attempts} attempts: {cause}")]
    Exhausted { attempts: u32, cause: anyhow::Error },

    /// The caller's predicate classified the failure as not worth retrying.
    #[error("non-retryable error: {cause}")]
    NonRetryable { cause: anyhow::Error },

    /// The surrounding shutdown token was cancelled mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The breaker is open; the operation was never attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Half-open trial slots are all taken; the operation was never attempted.
    #[error("too many requests in half-open state")]
    TooManyRequests,
}

impl ResilienceError {
    /// True for the rejection variants that mean "not attempted".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen | ResilienceError::TooManyRequests
        )
    }
}
