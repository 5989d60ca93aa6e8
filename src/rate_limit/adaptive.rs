//! Adaptive rate limiter.
//!
//! Wraps a token bucket and steers its rate from observed outcomes: sustained
//! errors shrink the rate, clean windows grow it back toward the maximum, and
//! an explicit throttle signal from the dependency halves it immediately.

use super::RateLimiter;
use anyhow::Result;
use std::sync::Mutex;
use std::time::Duration;

/// Observations per adjustment window.
const ADJUST_WINDOW: usize = 100;
/// Error rate above which the rate shrinks.
const SHRINK_THRESHOLD: f64 = 0.10;
/// Error rate below which the rate grows.
const GROW_THRESHOLD: f64 = 0.01;
const SHRINK_FACTOR: f64 = 0.8;
const GROW_FACTOR: f64 = 1.1;
/// Applied on an explicit throttle signal (e.g. HTTP 429).
const THROTTLE_FACTOR: f64 = 0.5;

pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    state: Mutex<AdaptiveState>,
}

struct AdaptiveState {
    min_rate: f64,
    max_rate: f64,
    target_rate: f64,
    burst: usize,
    success_count: usize,
    error_count: usize,
}

impl AdaptiveRateLimiter {
    /// Creates an adaptive limiter starting at `max_rate`.
    pub fn new(min_rate: f64, max_rate: f64, burst: usize) -> Self {
        Self {
            limiter: RateLimiter::new(max_rate, burst),
            state: Mutex::new(AdaptiveState {
                min_rate,
                max_rate,
                target_rate: max_rate,
                burst,
                success_count: 0,
                error_count: 0,
            }),
        }
    }

    /// Records a successful request.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.success_count += 1;
        self.check_and_adjust(&mut state);
    }

    /// Records a failed request.
    pub fn record_error(&self) {
        let mut state = self.state.lock().unwrap();
        state.error_count += 1;
        self.check_and_adjust(&mut state);
    }

    /// Records an explicit throttle signal from the dependency. Halves the
    /// rate immediately (floored at the minimum) and restarts the window.
    pub fn record_rate_limited(&self) {
        let mut state = self.state.lock().unwrap();
        state.target_rate = (state.target_rate * THROTTLE_FACTOR).max(state.min_rate);
        state.success_count = 0;
        state.error_count = 0;
        self.limiter.set_rate(state.target_rate, state.burst);
        tracing::debug!(
            target_rate = state.target_rate,
            "rate limited by dependency, halving target rate"
        );
    }

    /// Current target rate in requests per second.
    pub fn current_rate(&self) -> f64 {
        self.state.lock().unwrap().target_rate
    }

    /// The wrapped token bucket.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn wait(&self) {
        self.limiter.wait().await
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.limiter.wait_timeout(timeout).await
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.try_acquire()
    }

    /// Adjusts the rate once a full observation window has accumulated.
    fn check_and_adjust(&self, state: &mut AdaptiveState) {
        let total = state.success_count + state.error_count;
        if total < ADJUST_WINDOW {
            return;
        }

        let error_rate = state.error_count as f64 / total as f64;
        if error_rate > SHRINK_THRESHOLD {
            state.target_rate = (state.target_rate * SHRINK_FACTOR).max(state.min_rate);
        } else if error_rate < GROW_THRESHOLD && state.target_rate < state.max_rate {
            state.target_rate = (state.target_rate * GROW_FACTOR).min(state.max_rate);
        }

        self.limiter.set_rate(state.target_rate, state.burst);
        state.success_count = 0;
        state.error_count = 0;
    }
}
