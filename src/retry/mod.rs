//! Retry with exponential backoff and jitter.
//!
//! An operation is retried when its error carries a retryable marker (see
//! [`crate::error::retryable`]), when the configured predicate approves it,
//! or when the default classifier recognizes it as transient. Non-retryable
//! markers always win and end the loop immediately.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};

use crate::error::{is_non_retryable, is_retryable, retry_after, RetryError};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Substrings of error messages treated as transient by the default
/// classifier. Matched case-insensitively against the full error chain.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "temporary failure",
    "service unavailable",
    "too many requests",
    "rate limit",
    "429",
    "503",
    "504",
];

/// Custom retry predicate. Returning `true` authorizes another attempt for
/// an error that carries no marker.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Backoff and classification settings for [`retry_with_backoff`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Fractional jitter applied to each wait, e.g. 0.1 for +/-10%.
    pub jitter: f64,
    pub retry_if: Option<RetryPredicate>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            retry_if: Some(Arc::new(default_retry_condition)),
        }
    }
}

/// Runs `op` until it succeeds, the error is classified as permanent, or the
/// retry budget is exhausted. Exhaustion yields a [`RetryError`] wrapping the
/// last failure.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut interval = config.initial_interval;
    let mut attempt: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if is_non_retryable(&err) {
            return Err(err);
        }

        let authorized = is_retryable(&err)
            || config
                .retry_if
                .as_ref()
                .map(|pred| pred(&err))
                .unwrap_or(false);
        if !authorized {
            return Err(err);
        }

        if attempt >= config.max_retries {
            return Err(anyhow::Error::new(RetryError::new(attempt + 1, err)));
        }

        // A hint from the dependency overrides the computed interval
        let base = retry_after(&err).unwrap_or(interval);
        let wait = bounded_wait(base, config.jitter, config.max_interval);

        attempt += 1;
        tracing::debug!(
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "retrying after transient failure"
        );
        tokio::time::sleep(wait).await;

        interval = interval.mul_f64(config.multiplier).min(config.max_interval);
    }
}

/// [`retry_with_backoff`] with the default configuration.
pub async fn retry<T, F, Fut>(op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(&RetryConfig::default(), op).await
}

/// Default transient-error classifier: network-level reqwest failures plus
/// well-known throttling and availability messages.
pub fn default_retry_condition(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(req_err) = cause.downcast_ref::<reqwest::Error>() {
            if req_err.is_timeout() || req_err.is_connect() {
                return true;
            }
        }
    }

    let message = format!("{err:#}").to_lowercase();
    TRANSIENT_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Jitters `base` by the fractional `jitter`, then clamps to `max`. The
/// clamp runs after the jitter so `max` is a hard ceiling on the wait.
fn bounded_wait(base: Duration, jitter: f64, max: Duration) -> Duration {
    bounded_wait_secs(base.as_secs_f64(), jitter, max)
}

// Works in f64 seconds: `Duration` arithmetic panics on overflow, while an
// overgrown f64 exponent clamps cleanly to the cap.
fn bounded_wait_secs(base_secs: f64, jitter: f64, max: Duration) -> Duration {
    let mut secs = base_secs;
    if jitter > 0.0 {
        // Uniform in [-jitter, +jitter]
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
        secs *= (1.0 + offset).max(0.0);
    }
    Duration::from_secs_f64(secs.min(max.as_secs_f64()))
}

/// Standalone backoff schedule for callers that drive their own loop.
pub struct Backoff {
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            jitter,
            attempt: 0,
        }
    }

    /// Next wait in the schedule. The first call returns the initial
    /// interval; each subsequent call multiplies, capped at the maximum.
    pub fn next(&mut self) -> Duration {
        let base_secs =
            self.initial_interval.as_secs_f64() * self.multiplier.powi(self.attempt as i32);
        self.attempt += 1;
        bounded_wait_secs(base_secs, self.jitter, self.max_interval)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self::new(
            config.initial_interval,
            config.max_interval,
            config.multiplier,
            config.jitter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{non_retryable, retryable};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
            retry_if: Some(Arc::new(default_retry_condition)),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_config(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(retryable(anyhow!("connection reset")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_config(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(non_retryable(anyhow!("bad credentials")))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclassified_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_config(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow!("schema mismatch"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let result = retry_with_backoff(&fast_config(), || async {
            Err::<(), _>(retryable(anyhow!("connection refused")))
        })
        .await;

        let err = result.unwrap_err();
        let retry_err = err.downcast_ref::<RetryError>().expect("RetryError");
        // Initial attempt plus three retries
        assert_eq!(retry_err.attempts, 4);
        assert!(retry_err.last_error().to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_custom_predicate_authorizes_retry() {
        let config = RetryConfig {
            retry_if: Some(Arc::new(|err| err.to_string().contains("flaky"))),
            ..fast_config()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&config, move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow!("flaky upstream"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_condition_matches_transient_messages() {
        assert!(default_retry_condition(&anyhow!("dial tcp: connection refused")));
        assert!(default_retry_condition(&anyhow!("HTTP 503 Service Unavailable")));
        assert!(default_retry_condition(&anyhow!("Too Many Requests")));
        assert!(!default_retry_condition(&anyhow!("syntax error near SELECT")));
    }

    #[test]
    fn test_default_condition_inspects_context_chain() {
        let err = anyhow!("connection reset by peer").context("listing objects");
        assert!(default_retry_condition(&err));
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(450),
            2.0,
            0.0,
        );
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(400));
        assert_eq!(backoff.next(), Duration::from_millis(450));
        assert_eq!(backoff.attempt(), 4);

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_long_schedule_stays_capped() {
        // The exponent overflows f64-representable Durations well before
        // 200 attempts; every wait must still come back at the cap
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_secs(30),
            2.0,
            0.1,
        );
        for _ in 0..200 {
            assert!(backoff.next() <= Duration::from_secs(30));
        }
        assert_eq!(backoff.attempt(), 200);
    }

    #[test]
    fn test_jittered_wait_never_exceeds_max_interval() {
        let cap = Duration::from_millis(50);
        for _ in 0..1000 {
            assert!(bounded_wait(cap, 1.0, cap) <= cap);
        }
    }
}
