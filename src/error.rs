//! Shared error types for the connector SDK.
//!
//! Retry classification is marker-based: wrap an error with [`retryable`] or
//! [`non_retryable`] and the retry loop will honor the marker anywhere in the
//! `anyhow` chain. All wrappers preserve the underlying cause via
//! `std::error::Error::source` for programmatic inspection.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// An error explicitly marked as retryable, optionally carrying a
/// retry-after hint from the dependency (e.g. a 429 response header).
#[derive(Debug)]
pub struct RetryableError {
    source: anyhow::Error,
    retry_after: Option<Duration>,
}

impl RetryableError {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for RetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// An error explicitly marked as non-retryable. The retry loop returns it
/// immediately without further attempts.
#[derive(Debug)]
pub struct NonRetryableError {
    source: anyhow::Error,
}

impl fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for NonRetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Terminal error produced when all retry attempts are exhausted.
#[derive(Debug)]
pub struct RetryError {
    pub attempts: u32,
    source: anyhow::Error,
}

impl RetryError {
    pub fn new(attempts: u32, source: anyhow::Error) -> Self {
        Self { attempts, source }
    }

    /// The last underlying failure before giving up.
    pub fn last_error(&self) -> &anyhow::Error {
        &self.source
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation failed after {} attempts: {}",
            self.attempts, self.source
        )
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Rejection from a rate limiter when the wait deadline elapsed before a
/// permit became available.
#[derive(Debug, Error)]
#[error("rate limit exceeded (retry after {retry_after:?})")]
pub struct RateLimitError {
    pub retry_after: Duration,
}

impl RateLimitError {
    pub fn new(retry_after: Duration) -> Self {
        Self { retry_after }
    }
}

/// Fail-fast rejection while a circuit breaker is open.
#[derive(Debug, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitBreakerOpenError {
    pub name: String,
}

/// Error raised by a connector operation, carrying the connector name and
/// the operation for diagnostics plus the underlying cause when present.
#[derive(Debug)]
pub struct ConnectorError {
    pub connector: String,
    pub operation: String,
    pub message: String,
    cause: Option<anyhow::Error>,
}

impl ConnectorError {
    pub fn new(
        connector: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
        cause: Option<anyhow::Error>,
    ) -> Self {
        Self {
            connector: connector.into(),
            operation: operation.into(),
            message: message.into(),
            cause,
        }
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(
                f,
                "{}.{}: {} (cause: {})",
                self.connector, self.operation, self.message, cause
            ),
            None => write!(f, "{}.{}: {}", self.connector, self.operation, self.message),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Marks an error as retryable.
pub fn retryable(err: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(RetryableError {
        source: err.into(),
        retry_after: None,
    })
}

/// Marks an error as retryable with an explicit retry-after hint.
pub fn retryable_after(err: impl Into<anyhow::Error>, retry_after: Duration) -> anyhow::Error {
    anyhow::Error::new(RetryableError {
        source: err.into(),
        retry_after: Some(retry_after),
    })
}

/// Marks an error as non-retryable.
pub fn non_retryable(err: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(NonRetryableError { source: err.into() })
}

/// Whether the error carries a retryable marker anywhere in its chain.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<RetryableError>())
}

/// Whether the error carries a non-retryable marker anywhere in its chain.
pub fn is_non_retryable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<NonRetryableError>())
}

/// The retry-after hint carried by a retryable marker, if any.
pub fn retry_after(err: &anyhow::Error) -> Option<Duration> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RetryableError>())
        .and_then(|marked| marked.retry_after)
}
