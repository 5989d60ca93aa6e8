//! Composition of multiple auth providers.

use super::AuthProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Applies several providers to the same request in order, e.g. an API key
/// header plus a signed authorization header. The first failure aborts the
/// chain.
pub struct ChainedAuth {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl ChainedAuth {
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl AuthProvider for ChainedAuth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        for provider in &self.providers {
            provider
                .authenticate(request)
                .await
                .with_context(|| format!("auth provider '{}' failed", provider.auth_type()))?;
        }
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.providers.iter().any(|provider| provider.is_expired())
    }

    async fn refresh(&self) -> Result<()> {
        for provider in &self.providers {
            provider
                .refresh()
                .await
                .with_context(|| format!("refreshing auth provider '{}'", provider.auth_type()))?;
        }
        Ok(())
    }

    fn auth_type(&self) -> &'static str {
        "chained"
    }
}
