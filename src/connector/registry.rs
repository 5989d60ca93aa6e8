//! Connector type registry.

use super::Connector;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Produces a fresh, unconnected connector instance.
pub type ConnectorFactory = Box<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;

/// Maps connector type names to factories. An explicit object rather than a
/// process-wide global so embedders can scope registries as they see fit.
pub struct ConnectorRegistry {
    factories: RwLock<HashMap<String, ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory for a type name, replacing any previous one.
    pub fn register(&self, connector_type: impl Into<String>, factory: ConnectorFactory) {
        let connector_type = connector_type.into();
        tracing::debug!(connector_type = %connector_type, "registering connector factory");
        self.factories
            .write()
            .unwrap()
            .insert(connector_type, factory);
    }

    /// Instantiates a connector of the given type.
    pub fn create(&self, connector_type: &str) -> Result<Arc<dyn Connector>> {
        let factories = self.factories.read().unwrap();
        match factories.get(connector_type) {
            Some(factory) => Ok(factory()),
            None => bail!("unknown connector type '{connector_type}'"),
        }
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.read().unwrap().contains_key(connector_type)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().unwrap().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
