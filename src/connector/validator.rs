//! Configuration validation and lifecycle hooks.

use super::ConnectorConfig;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Validates a configuration before [`connect`](super::Connector::connect)
/// proceeds. `apply_defaults` runs after validation succeeds.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, config: &ConnectorConfig) -> Result<()>;

    /// Field names that must be present in options or credentials.
    fn required_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Optional fields with their default values.
    fn optional_fields(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Fills in defaults for missing optional fields.
    fn apply_defaults(&self, config: &mut ConnectorConfig) {
        for (field, default) in self.optional_fields() {
            config.options.entry(field).or_insert(default);
        }
    }
}

/// Requires a name, a type, and a declared set of fields present in either
/// options or credentials.
pub struct DefaultConfigValidator {
    required: Vec<String>,
    optional: HashMap<String, Value>,
}

impl DefaultConfigValidator {
    pub fn new(required: Vec<String>, optional: HashMap<String, Value>) -> Self {
        Self { required, optional }
    }
}

impl ConfigValidator for DefaultConfigValidator {
    fn validate(&self, config: &ConnectorConfig) -> Result<()> {
        if config.name.is_empty() {
            bail!("connector name is required");
        }
        if config.connector_type.is_empty() {
            bail!("connector type is required");
        }
        for field in &self.required {
            if !config.options.contains_key(field) && !config.credentials.contains_key(field) {
                bail!("required field '{field}' is missing");
            }
        }
        Ok(())
    }

    fn required_fields(&self) -> Vec<String> {
        self.required.clone()
    }

    fn optional_fields(&self) -> HashMap<String, Value> {
        self.optional.clone()
    }
}

/// Declarative schema for connector options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    /// One of `string`, `number`, `integer`, `boolean`, `array`, `object`.
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(rename = "enum", default)]
    pub allowed: Vec<Value>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Validates options against a [`ConfigSchema`]. Credential fields satisfy
/// string-typed requirements.
pub struct SchemaValidator {
    schema: ConfigSchema,
}

impl SchemaValidator {
    pub fn new(schema: ConfigSchema) -> Self {
        Self { schema }
    }

    fn check_property(name: &str, schema: &PropertySchema, value: &Value) -> Result<()> {
        let type_ok = match schema.value_type.as_str() {
            "" => true,
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            other => bail!("property '{name}' has unknown schema type '{other}'"),
        };
        if !type_ok {
            bail!(
                "property '{name}' must be of type {}, got {value}",
                schema.value_type
            );
        }

        if !schema.allowed.is_empty() && !schema.allowed.contains(value) {
            bail!("property '{name}' has value {value}, not among the allowed values");
        }

        if let Some(number) = value.as_f64() {
            if let Some(minimum) = schema.minimum {
                if number < minimum {
                    bail!("property '{name}' is {number}, below the minimum {minimum}");
                }
            }
            if let Some(maximum) = schema.maximum {
                if number > maximum {
                    bail!("property '{name}' is {number}, above the maximum {maximum}");
                }
            }
        }
        Ok(())
    }
}

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &ConnectorConfig) -> Result<()> {
        if config.name.is_empty() {
            bail!("connector name is required");
        }
        if config.connector_type.is_empty() {
            bail!("connector type is required");
        }

        for field in &self.schema.required {
            if !config.options.contains_key(field) && !config.credentials.contains_key(field) {
                bail!("required field '{field}' is missing");
            }
        }

        for (name, property) in &self.schema.properties {
            if let Some(value) = config.options.get(name) {
                Self::check_property(name, property, value)?;
            } else if let Some(credential) = config.credentials.get(name) {
                Self::check_property(name, property, &Value::String(credential.clone()))?;
            }
        }
        Ok(())
    }

    fn required_fields(&self) -> Vec<String> {
        self.schema.required.clone()
    }

    fn optional_fields(&self) -> HashMap<String, Value> {
        self.schema
            .properties
            .iter()
            .filter_map(|(name, property)| {
                property
                    .default
                    .clone()
                    .map(|default| (name.clone(), default))
            })
            .collect()
    }
}

/// Runs before the connection is marked live; a failure aborts `connect`.
pub type ConnectHook =
    Box<dyn for<'a> Fn(&'a ConnectorConfig) -> BoxFuture<'a, Result<()>> + Send + Sync>;
/// Runs during `disconnect`; failures are logged, not propagated.
pub type DisconnectHook = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
/// Probes the backing system; a failure marks the connector unhealthy.
pub type HealthCheckHook = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
/// Runs before each query is dispatched.
pub type QueryHook =
    Box<dyn for<'a> Fn(&'a super::Query) -> BoxFuture<'a, Result<()>> + Send + Sync>;
/// Runs before each command is dispatched.
pub type ExecuteHook =
    Box<dyn for<'a> Fn(&'a super::Command) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Optional callbacks a concrete connector plugs into the base lifecycle.
#[derive(Default)]
pub struct LifecycleHooks {
    pub on_connect: Option<ConnectHook>,
    pub on_disconnect: Option<DisconnectHook>,
    pub on_health_check: Option<HealthCheckHook>,
    pub on_query: Option<QueryHook>,
    pub on_execute: Option<ExecuteHook>,
}
