//! Circuit breaker.
//!
//! Counts consecutive failures and fails fast once the threshold is reached.
//! After the reset timeout the breaker admits trial calls (half-open) and
//! closes again only after enough of them succeed. Any failure while
//! half-open reopens it immediately.

use crate::error::CircuitBreakerOpenError;
use anyhow::Result;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Consecutive half-open successes required to close the breaker.
const HALF_OPEN_MAX: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures,
            reset_timeout,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Runs `op` through the breaker. While open (and not yet cooled down)
    /// the call is rejected with [`CircuitBreakerOpenError`] without invoking
    /// `op` at all.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let mut state = self.state.lock().unwrap();
            if state.state == CircuitState::Open {
                let cooled = state
                    .last_failure_at
                    .map(|at| at.elapsed() > self.reset_timeout)
                    .unwrap_or(true);
                if !cooled {
                    return Err(CircuitBreakerOpenError {
                        name: self.name.clone(),
                    }
                    .into());
                }
                state.state = CircuitState::HalfOpen;
                state.half_open_successes = 0;
                tracing::debug!(breaker = %self.name, "circuit breaker half-open, admitting trial calls");
            }
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().unwrap().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Force-closes the breaker and clears all counters.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.state = CircuitState::Closed;
        state.failures = 0;
        state.half_open_successes = 0;
        state.last_failure_at = None;
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        match state.state {
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= HALF_OPEN_MAX {
                    state.state = CircuitState::Closed;
                    state.failures = 0;
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            _ => {
                state.failures = 0;
            }
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;
        state.last_failure_at = Some(Instant::now());

        if state.state == CircuitState::HalfOpen || state.failures >= self.max_failures {
            if state.state != CircuitState::Open {
                tracing::warn!(
                    breaker = %self.name,
                    failures = state.failures,
                    "circuit breaker opened"
                );
            }
            state.state = CircuitState::Open;
        }
    }
}
