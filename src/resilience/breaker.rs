//! Circuit breaker for failing dependencies.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;

use super::{retry::unless_circuit_open, ResilienceError, RetryPolicy};
use crate::shutdown::Shutdown;

/// Breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; consecutive failures accumulate.
    Closed,
    /// All calls rejected until the timeout elapses.
    Open,
    /// A bounded number of trial calls test for recovery.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

pub type StateChangeHook = Arc<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

/// Breaker tuning.
#[derive(Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` before the circuit opens.
    pub max_failures: u32,
    /// Time spent in `Open` before probing with a half-open trial.
    pub timeout: Duration,
    /// Concurrent trial calls allowed in `HalfOpen`; accumulating this many
    /// successes closes the circuit again.
    pub max_requests: u32,
    /// Observer for state transitions; fired on a separate thread so it can
    /// never block the transition itself.
    pub on_state_change: Option<StateChangeHook>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            max_requests: 1,
            on_state_change: None,
        }
    }
}

struct Shared {
    state: BreakerState,
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
    last_transition: Instant,
}

/// Breaker statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    pub half_open_in_flight: u32,
    pub since_last_transition: Duration,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    shared: Mutex<Shared>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            shared: Mutex::new(Shared {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                half_open_in_flight: 0,
                last_transition: Instant::now(),
            }),
        }
    }

    /// Run `op` through the breaker. When the circuit is open the operation
    /// is never invoked and [`ResilienceError::CircuitOpen`] comes back
    /// instead; the distinguished error tells callers "not attempted".
    pub fn execute<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.before_request()?;

        match op() {
            Ok(value) => {
                self.record(true);
                Ok(value)
            }
            Err(e) => {
                self.record(false);
                Err(e)
            }
        }
    }

    fn before_request(&self) -> Result<()> {
        let mut shared = self.shared.lock();

        if shared.state == BreakerState::Open
            && shared.last_transition.elapsed() >= self.config.timeout
        {
            self.set_state(&mut shared, BreakerState::HalfOpen);
        }

        match shared.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(ResilienceError::CircuitOpen.into()),
            BreakerState::HalfOpen => {
                if shared.half_open_in_flight >= self.config.max_requests {
                    return Err(ResilienceError::TooManyRequests.into());
                }
                shared.half_open_in_flight += 1;
                Ok(())
            }
        }
    }

    fn record(&self, success: bool) {
        let mut shared = self.shared.lock();
        if success {
            self.on_success(&mut shared);
        } else {
            self.on_failure(&mut shared);
        }
    }

    fn on_success(&self, shared: &mut Shared) {
        match shared.state {
            BreakerState::Closed => {
                // Any success resets the consecutive-failure count.
                shared.failures = 0;
            }
            BreakerState::HalfOpen => {
                shared.half_open_in_flight = shared.half_open_in_flight.saturating_sub(1);
                shared.successes += 1;
                if shared.successes >= self.config.max_requests {
                    self.set_state(shared, BreakerState::Closed);
                    shared.failures = 0;
                    shared.successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, shared: &mut Shared) {
        shared.failures += 1;

        match shared.state {
            BreakerState::Closed => {
                if shared.failures >= self.config.max_failures {
                    self.set_state(shared, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                // Any trial failure reopens the circuit.
                shared.half_open_in_flight = shared.half_open_in_flight.saturating_sub(1);
                shared.successes = 0;
                self.set_state(shared, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    fn set_state(&self, shared: &mut Shared, new_state: BreakerState) {
        let old_state = shared.state;
        if old_state == new_state {
            return;
        }

        shared.state = new_state;
        shared.last_transition = Instant::now();
        tracing::debug!(from = %old_state, to = %new_state, "circuit breaker transition");

        if let Some(hook) = self.config.on_state_change.clone() {
            std::thread::spawn(move || hook(old_state, new_state));
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut shared = self.shared.lock();
        // Report the half-open transition even before the next call arrives.
        if shared.state == BreakerState::Open
            && shared.last_transition.elapsed() >= self.config.timeout
        {
            self.set_state(&mut shared, BreakerState::HalfOpen);
        }
        shared.state
    }

    pub fn stats(&self) -> BreakerStats {
        let shared = self.shared.lock();
        BreakerStats {
            state: shared.state,
            failures: shared.failures,
            successes: shared.successes,
            half_open_in_flight: shared.half_open_in_flight,
            since_last_transition: shared.last_transition.elapsed(),
        }
    }

    /// Force the breaker back to `Closed`, clearing all counters.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        self.set_state(&mut shared, BreakerState::Closed);
        shared.failures = 0;
        shared.successes = 0;
        shared.half_open_in_flight = 0;
    }
}

/// Retry and circuit breaker composed: the breaker wraps the operation and
/// the retry policy wraps the combined call. Breaker rejections are
/// non-retryable, so an open circuit fails fast.
pub struct ResilientExecutor {
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientExecutor {
    pub fn new(retry: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry, breaker }
    }

    pub fn execute<T>(
        &self,
        shutdown: &Shutdown,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        self.retry
            .run(shutdown, unless_circuit_open, || self.breaker.execute(&mut op))
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
