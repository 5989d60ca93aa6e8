//! Rate limiting primitives for outbound connectors.
//!
//! All limiters replenish lazily on each call (no background timers) and are
//! safe for concurrent use. Waiting is async and cancel-safe: dropping the
//! future abandons the wait without consuming a permit.

mod adaptive;
mod multi_tenant;
mod sliding_window;

pub use adaptive::AdaptiveRateLimiter;
pub use multi_tenant::MultiTenantRateLimiter;
pub use sliding_window::SlidingWindowRateLimiter;

use crate::error::RateLimitError;
use anyhow::Result;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Polling interval while the bucket is fully closed (`rate == 0`). A later
/// `set_rate` revives the bucket within one interval.
const CLOSED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Token bucket rate limiter.
///
/// Holds up to `burst` tokens, replenished continuously at `rate` tokens per
/// second. Tokens are recomputed from elapsed time on every call rather than
/// by a refill timer.
///
/// A `rate` of zero means "fully closed": `wait` blocks until cancelled and
/// `wait_timeout` returns the deadline error. This is intentional and is how
/// a connector is throttled to a standstill without tearing it down.
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

struct BucketState {
    rate: f64,
    burst: usize,
    tokens: f64,
    last_update: Instant,
}

impl BucketState {
    /// Replenish tokens from elapsed time, never above `burst`.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst as f64);
        self.last_update = now;
    }
}

impl RateLimiter {
    /// Creates a limiter allowing `rate` requests per second with bursts of
    /// up to `burst`. The bucket starts full.
    pub fn new(rate: f64, burst: usize) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate,
                burst,
                tokens: burst as f64,
                last_update: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available.
    ///
    /// No fairness is guaranteed across concurrent waiters; acquisition is a
    /// best-effort race.
    pub async fn wait(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                state.refill();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                if state.rate <= 0.0 {
                    CLOSED_POLL_INTERVAL
                } else {
                    Duration::from_secs_f64((1.0 - state.tokens) / state.rate)
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` with a
    /// [`RateLimitError`] carrying the remaining shortfall as a hint.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(RateLimitError::new(self.time_to_token()).into()),
        }
    }

    /// Attempts to take one token without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.refill();
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Deducts up to `n` tokens and returns how long the caller must wait for
    /// the remainder to replenish. Zero means all `n` were available now.
    pub fn reserve(&self, n: usize) -> Duration {
        let mut state = self.state.lock().unwrap();
        state.refill();

        let needed = n as f64;
        if state.tokens >= needed {
            state.tokens -= needed;
            return Duration::ZERO;
        }

        let deficit = needed - state.tokens;
        state.tokens = 0.0;
        if state.rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(deficit / state.rate)
    }

    /// Number of whole tokens currently available.
    pub fn available(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.refill();
        state.tokens as usize
    }

    /// Refills the bucket to full capacity.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.tokens = state.burst as f64;
        state.last_update = Instant::now();
    }

    /// Reconfigures the limiter live. Current tokens are clamped to the new
    /// burst so a shrink takes effect immediately.
    pub fn set_rate(&self, rate: f64, burst: usize) {
        let mut state = self.state.lock().unwrap();
        state.refill();
        state.rate = rate;
        state.burst = burst;
        if state.tokens > burst as f64 {
            state.tokens = burst as f64;
        }
    }

    /// Current replenishment rate in tokens per second.
    pub fn current_rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    /// Time until at least one token is available (zero if one is available
    /// now). Does not consume anything.
    fn time_to_token(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        state.refill();
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if state.rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / state.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full_and_drains_to_exactly_burst() {
        let limiter = RateLimiter::new(5.0, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        // Fourth immediate acquire must fail
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_refill_after_one_over_rate_seconds() {
        let limiter = RateLimiter::new(10.0, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // 1/rate = 100ms; 150ms is comfortably past one token's worth
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_reserve_zero_wait_iff_available() {
        let limiter = RateLimiter::new(1.0, 5);
        assert_eq!(limiter.available(), 5);

        assert_eq!(limiter.reserve(3), Duration::ZERO);
        assert_eq!(limiter.available(), 2);

        // Overdraft: 2 available, 4 requested -> wait for the 2-token deficit
        let wait = limiter.reserve(4);
        assert!(wait > Duration::ZERO);
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn test_wait_consumes_token() {
        let limiter = RateLimiter::new(100.0, 1);
        limiter.wait().await;
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_wait_timeout_errors_when_closed() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(limiter.try_acquire()); // drain the initial burst

        let result = limiter.wait_timeout(Duration::from_millis(50)).await;
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<RateLimitError>().is_some());
    }

    #[test]
    fn test_set_rate_clamps_tokens_to_new_burst() {
        let limiter = RateLimiter::new(1.0, 10);
        limiter.set_rate(1.0, 2);
        assert_eq!(limiter.available(), 2);
        assert_eq!(limiter.current_rate(), 1.0);
    }

    #[test]
    fn test_reset_refills_to_burst() {
        let limiter = RateLimiter::new(1.0, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert_eq!(limiter.available(), 0);

        limiter.reset();
        assert_eq!(limiter.available(), 2);
    }
}
