//! Connector abstraction: the trait, its data types, configuration
//! validation, and the reusable base implementation.

pub mod base;
pub mod registry;
pub mod validator;

pub use base::{BaseConnector, ConnectorBuilder, Resilience};
pub use registry::ConnectorRegistry;
pub use validator::{
    ConfigSchema, ConfigValidator, DefaultConfigValidator, LifecycleHooks, PropertySchema,
    SchemaValidator,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// A connection to an external system capable of reads (`query`) and writes
/// (`execute`).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: ConnectorConfig) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn health_check(&self) -> Result<HealthStatus>;
    async fn query(&self, query: &Query) -> Result<QueryResult>;
    async fn execute(&self, command: &Command) -> Result<CommandResult>;

    /// Instance name from the active configuration.
    fn name(&self) -> String;
    /// Kind of system this connector talks to, e.g. `"postgres"`.
    fn connector_type(&self) -> String;
    fn version(&self) -> String;
    fn capabilities(&self) -> Vec<String>;
}

#[cfg(test)]
impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connector({})", self.connector_type())
    }
}

/// Configuration passed to [`Connector::connect`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub connector_type: String,
    #[serde(default)]
    pub connection_url: Option<String>,
    /// Secrets, kept separate from options so they can be redacted.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    /// Connector-specific settings.
    #[serde(default)]
    pub options: HashMap<String, Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub statement: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<HashMap<String, Value>>,
    pub row_count: usize,
    pub duration: Duration,
    #[serde(default)]
    pub cached: bool,
    pub connector: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub rows_affected: u64,
    pub duration: Duration,
    #[serde(default)]
    pub message: String,
    pub connector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: Duration,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_with_type_rename_and_defaults() {
        let config: ConnectorConfig = serde_json::from_str(
            r#"{
                "name": "pg-main",
                "type": "postgres",
                "connection_url": "postgres://localhost/app",
                "credentials": {"password": "s3cret"},
                "options": {"pool_size": 8}
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "pg-main");
        assert_eq!(config.connector_type, "postgres");
        assert_eq!(config.credentials.get("password").unwrap(), "s3cret");
        assert_eq!(config.options.get("pool_size").unwrap(), &Value::from(8));
        assert!(config.timeout.is_none());
        assert!(config.tenant_id.is_none());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ConnectorConfig = serde_json::from_str("{}").unwrap();
        assert!(config.name.is_empty());
        assert!(config.credentials.is_empty());
        assert!(config.options.is_empty());
    }
}
