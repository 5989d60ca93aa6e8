//! Reusable connector scaffold.
//!
//! [`BaseConnector`] implements the full [`Connector`] lifecycle including
//! validation, rate limiting, metrics, and hooks. Concrete connectors plug
//! their behavior in through [`LifecycleHooks`] or wrap the base and
//! delegate.

use super::validator::{ConfigValidator, LifecycleHooks};
use super::{
    Command, CommandResult, Connector, ConnectorConfig, HealthStatus, Query, QueryResult,
};
use crate::auth::AuthProvider;
use crate::error::ConnectorError;
use crate::metrics::ConnectorMetrics;
use crate::rate_limit::RateLimiter;
use crate::retry::{CircuitBreaker, RetryConfig};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resilience policies attached to a connector. All parts are optional
/// except the retry configuration, which always has defaults.
#[derive(Default)]
pub struct Resilience {
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub retry: RetryConfig,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub auth: Option<Arc<dyn AuthProvider>>,
}

struct ConnectorState {
    name: String,
    config: Option<ConnectorConfig>,
    connected: bool,
}

pub struct BaseConnector {
    connector_type: String,
    version: String,
    capabilities: Vec<String>,
    // Held only for short synchronous sections, never across an await
    state: RwLock<ConnectorState>,
    // Serializes connect/disconnect including their hooks
    lifecycle: tokio::sync::Mutex<()>,
    resilience: Resilience,
    validator: Option<Box<dyn ConfigValidator>>,
    hooks: LifecycleHooks,
    metrics: Arc<ConnectorMetrics>,
}

impl BaseConnector {
    pub fn builder(
        name: impl Into<String>,
        connector_type: impl Into<String>,
    ) -> ConnectorBuilder {
        ConnectorBuilder::new(name, connector_type)
    }

    /// Instance name, falling back to the connector type before any
    /// configuration names it.
    pub fn instance_name(&self) -> String {
        let state = self.state.read().unwrap();
        if state.name.is_empty() {
            self.connector_type.clone()
        } else {
            state.name.clone()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().unwrap().connected
    }

    /// Overrides the connected flag directly. Intended for tests and for
    /// wrappers that manage their own transport.
    pub fn set_connected(&self, connected: bool) {
        self.state.write().unwrap().connected = connected;
    }

    /// Active configuration, if connected.
    pub fn config(&self) -> Option<ConnectorConfig> {
        self.state.read().unwrap().config.clone()
    }

    /// Operation timeout from the active configuration.
    pub fn timeout(&self) -> Duration {
        self.state
            .read()
            .unwrap()
            .config
            .as_ref()
            .and_then(|config| config.timeout)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn option(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap()
            .config
            .as_ref()
            .and_then(|config| config.options.get(key).cloned())
    }

    pub fn string_option(&self, key: &str) -> Option<String> {
        self.option(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn int_option(&self, key: &str) -> Option<i64> {
        self.option(key).and_then(|value| value.as_i64())
    }

    pub fn bool_option(&self, key: &str) -> Option<bool> {
        self.option(key).and_then(|value| value.as_bool())
    }

    pub fn credential(&self, key: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .config
            .as_ref()
            .and_then(|config| config.credentials.get(key).cloned())
    }

    pub fn metrics(&self) -> Arc<ConnectorMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    async fn acquire_rate_limit(&self, operation: &str) -> Result<()> {
        if let Some(limiter) = &self.resilience.rate_limiter {
            limiter.wait_timeout(self.timeout()).await.map_err(|err| {
                anyhow::Error::new(ConnectorError::new(
                    self.instance_name(),
                    operation,
                    "rate limit exceeded",
                    Some(err),
                ))
            })?;
        }
        Ok(())
    }

    fn ensure_connected(&self, operation: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectorError::new(
                self.instance_name(),
                operation,
                "not connected",
                None,
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for BaseConnector {
    async fn connect(&self, mut config: ConnectorConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(validator) = &self.validator {
            if let Err(err) = validator.validate(&config) {
                return Err(ConnectorError::new(
                    if config.name.is_empty() {
                        self.connector_type.clone()
                    } else {
                        config.name.clone()
                    },
                    "connect",
                    "configuration validation failed",
                    Some(err),
                )
                .into());
            }
            validator.apply_defaults(&mut config);
        }
        if config.timeout.is_none() {
            config.timeout = Some(DEFAULT_TIMEOUT);
        }

        if let Some(hook) = &self.hooks.on_connect {
            if let Err(err) = hook(&config).await {
                self.metrics.record_error();
                return Err(ConnectorError::new(
                    config.name.clone(),
                    "connect",
                    "connect hook failed",
                    Some(err),
                )
                .into());
            }
        }

        {
            let mut state = self.state.write().unwrap();
            state.name = config.name.clone();
            state.config = Some(config);
            state.connected = true;
        }
        self.metrics.record_connect();
        tracing::info!(
            connector = %self.instance_name(),
            connector_type = %self.connector_type,
            "connector connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.is_connected() {
            return Ok(());
        }

        // Hook failures are logged but never block teardown
        if let Some(hook) = &self.hooks.on_disconnect {
            if let Err(err) = hook().await {
                tracing::warn!(
                    connector = %self.instance_name(),
                    error = %err,
                    "disconnect hook failed"
                );
            }
        }

        self.state.write().unwrap().connected = false;
        self.metrics.record_disconnect();
        tracing::info!(connector = %self.instance_name(), "connector disconnected");
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        let mut details = HashMap::new();
        details.insert("type".to_string(), self.connector_type.clone());
        details.insert("version".to_string(), self.version.clone());

        if !self.is_connected() {
            return Ok(HealthStatus {
                healthy: false,
                latency: start.elapsed(),
                details,
                timestamp: Utc::now(),
                error: Some("not connected".to_string()),
            });
        }

        let error = match &self.hooks.on_health_check {
            Some(hook) => hook().await.err().map(|err| format!("{err:#}")),
            None => None,
        };

        Ok(HealthStatus {
            healthy: error.is_none(),
            latency: start.elapsed(),
            details,
            timestamp: Utc::now(),
            error,
        })
    }

    async fn query(&self, query: &Query) -> Result<QueryResult> {
        self.ensure_connected("query")?;
        self.acquire_rate_limit("query").await?;

        let start = Instant::now();
        if let Some(hook) = &self.hooks.on_query {
            if let Err(err) = hook(query).await {
                self.metrics.record_query(start.elapsed(), false);
                return Err(ConnectorError::new(
                    self.instance_name(),
                    "query",
                    "query hook failed",
                    Some(err),
                )
                .into());
            }
        }

        // The base carries no transport; concrete connectors replace this
        let result = QueryResult {
            rows: Vec::new(),
            row_count: 0,
            duration: start.elapsed(),
            cached: false,
            connector: self.instance_name(),
        };
        self.metrics.record_query(result.duration, true);
        Ok(result)
    }

    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        self.ensure_connected("execute")?;
        self.acquire_rate_limit("execute").await?;

        let start = Instant::now();
        if let Some(hook) = &self.hooks.on_execute {
            if let Err(err) = hook(command).await {
                self.metrics.record_execute(start.elapsed(), false);
                return Err(ConnectorError::new(
                    self.instance_name(),
                    "execute",
                    "execute hook failed",
                    Some(err),
                )
                .into());
            }
        }

        let result = CommandResult {
            success: true,
            rows_affected: 0,
            duration: start.elapsed(),
            message: "base connector execute".to_string(),
            connector: self.instance_name(),
        };
        self.metrics.record_execute(result.duration, true);
        Ok(result)
    }

    fn name(&self) -> String {
        self.instance_name()
    }

    fn connector_type(&self) -> String {
        self.connector_type.clone()
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }
}

/// Assembles a [`BaseConnector`] piece by piece.
pub struct ConnectorBuilder {
    name: String,
    connector_type: String,
    version: String,
    capabilities: Vec<String>,
    resilience: Resilience,
    validator: Option<Box<dyn ConfigValidator>>,
    hooks: LifecycleHooks,
}

impl ConnectorBuilder {
    pub fn new(name: impl Into<String>, connector_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector_type: connector_type.into(),
            version: "1.0.0".to_string(),
            capabilities: vec!["query".to_string(), "execute".to_string()],
            resilience: Resilience::default(),
            validator: None,
            hooks: LifecycleHooks::default(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.resilience.auth = Some(auth);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.resilience.rate_limiter = Some(limiter);
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.resilience.retry = retry;
        self
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.resilience.circuit_breaker = Some(breaker);
        self
    }

    pub fn validator(mut self, validator: Box<dyn ConfigValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> BaseConnector {
        let metrics = Arc::new(ConnectorMetrics::new(self.connector_type.clone()));
        BaseConnector {
            connector_type: self.connector_type,
            version: self.version,
            capabilities: self.capabilities,
            state: RwLock::new(ConnectorState {
                name: self.name,
                config: None,
                connected: false,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            resilience: self.resilience,
            validator: self.validator,
            hooks: self.hooks,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::validator::DefaultConfigValidator;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(name: &str) -> ConnectorConfig {
        ConnectorConfig {
            name: name.to_string(),
            connector_type: "mock".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_then_query_lifecycle() {
        let connector = BaseConnector::builder("mock-1", "mock").build();
        assert!(!connector.is_connected());

        connector.connect(config("mock-1")).await.unwrap();
        assert!(connector.is_connected());
        assert_eq!(connector.name(), "mock-1");
        // Default timeout applied when the config carries none
        assert_eq!(connector.timeout(), DEFAULT_TIMEOUT);

        let result = connector.query(&Query::default()).await.unwrap();
        assert_eq!(result.connector, "mock-1");
        assert_eq!(result.row_count, 0);

        connector.disconnect().await.unwrap();
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_query_rejected_when_not_connected() {
        let connector = BaseConnector::builder("mock-1", "mock").build();
        let err = connector.query(&Query::default()).await.unwrap_err();
        let connector_err = err.downcast_ref::<ConnectorError>().unwrap();
        assert_eq!(connector_err.operation, "query");
        assert_eq!(connector_err.message, "not connected");
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_connect() {
        let connector = BaseConnector::builder("mock-1", "mock")
            .validator(Box::new(DefaultConfigValidator::new(
                vec!["host".to_string()],
                HashMap::new(),
            )))
            .build();

        let err = connector.connect(config("mock-1")).await.unwrap_err();
        assert!(err.to_string().contains("configuration validation failed"));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_connect_hook_failure_is_fatal() {
        let hooks = LifecycleHooks {
            on_connect: Some(Box::new(|_config| {
                Box::pin(async { Err(anyhow!("backend unreachable")) })
            })),
            ..Default::default()
        };
        let connector = BaseConnector::builder("mock-1", "mock").hooks(hooks).build();

        let err = connector.connect(config("mock-1")).await.unwrap_err();
        assert!(err.to_string().contains("connect hook failed"));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_hook_failure_is_tolerated() {
        let hooks = LifecycleHooks {
            on_disconnect: Some(Box::new(|| {
                Box::pin(async { Err(anyhow!("close failed")) })
            })),
            ..Default::default()
        };
        let connector = BaseConnector::builder("mock-1", "mock").hooks(hooks).build();

        connector.connect(config("mock-1")).await.unwrap();
        connector.disconnect().await.unwrap();
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let hooks = LifecycleHooks {
            on_disconnect: Some(Box::new(move || {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })),
            ..Default::default()
        };
        let connector = BaseConnector::builder("mock-1", "mock").hooks(hooks).build();

        connector.connect(config("mock-1")).await.unwrap();
        connector.disconnect().await.unwrap();
        connector.disconnect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check_reflects_hook_outcome() {
        let connector = BaseConnector::builder("mock-1", "mock").build();
        let status = connector.health_check().await.unwrap();
        assert!(!status.healthy);
        assert_eq!(status.error.as_deref(), Some("not connected"));

        connector.connect(config("mock-1")).await.unwrap();
        let status = connector.health_check().await.unwrap();
        assert!(status.healthy);
        assert_eq!(status.details.get("type").unwrap(), "mock");

        let failing = BaseConnector::builder("mock-2", "mock")
            .hooks(LifecycleHooks {
                on_health_check: Some(Box::new(|| {
                    Box::pin(async { Err(anyhow!("ping failed")) })
                })),
                ..Default::default()
            })
            .build();
        failing.connect(config("mock-2")).await.unwrap();
        let status = failing.health_check().await.unwrap();
        assert!(!status.healthy);
        assert!(status.error.unwrap().contains("ping failed"));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_maps_to_connector_error() {
        let limiter = Arc::new(RateLimiter::new(0.0, 1));
        assert!(limiter.try_acquire()); // drain the initial burst

        let connector = BaseConnector::builder("mock-1", "mock")
            .rate_limiter(limiter)
            .build();
        let mut cfg = config("mock-1");
        cfg.timeout = Some(Duration::from_millis(50));
        connector.connect(cfg).await.unwrap();

        let err = connector.query(&Query::default()).await.unwrap_err();
        let connector_err = err.downcast_ref::<ConnectorError>().unwrap();
        assert_eq!(connector_err.message, "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_option_accessors() {
        let connector = BaseConnector::builder("mock-1", "mock").build();
        let mut cfg = config("mock-1");
        cfg.options.insert("host".to_string(), Value::from("db"));
        cfg.options.insert("pool_size".to_string(), Value::from(8));
        cfg.options.insert("ssl".to_string(), Value::from(true));
        cfg.credentials
            .insert("password".to_string(), "s3cret".to_string());
        connector.connect(cfg).await.unwrap();

        assert_eq!(connector.string_option("host").as_deref(), Some("db"));
        assert_eq!(connector.int_option("pool_size"), Some(8));
        assert_eq!(connector.bool_option("ssl"), Some(true));
        assert_eq!(connector.credential("password").as_deref(), Some("s3cret"));
        assert!(connector.option("missing").is_none());
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_operation() {
        let connector = BaseConnector::builder("mock-1", "mock").build();
        connector.connect(config("mock-1")).await.unwrap();
        connector.query(&Query::default()).await.unwrap();
        connector.execute(&Command::default()).await.unwrap();
        connector.disconnect().await.unwrap();

        let snapshot = connector.metrics().snapshot();
        assert_eq!(snapshot.queries, 1);
        assert_eq!(snapshot.executes, 1);
        assert_eq!(snapshot.connects, 1);
        assert_eq!(snapshot.disconnects, 1);
        assert_eq!(snapshot.errors, 0);
    }
}
