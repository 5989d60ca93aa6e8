//! Resilience and authentication toolkit for building connectors to
//! external systems.
//!
//! The pieces compose but do not require each other: rate limiters, retry
//! with backoff, circuit breakers, auth providers, and metrics can each be
//! used standalone, or wired together through
//! [`connector::BaseConnector`].

pub mod auth; // authentication providers (API key, basic, bearer, OAuth2, SigV4)
pub mod connector; // connector trait, base implementation, registry, validation
pub mod error; // shared error types and retry markers
pub mod metrics; // per-connector metrics and Prometheus export
pub mod rate_limit; // token bucket, sliding window, adaptive, multi-tenant
pub mod retry; // backoff retry loop and circuit breaker
