//! Per-tenant rate limiting.
//!
//! Keeps one token bucket per tenant key, created on first use with the
//! default rate and burst. Individual tenants can be reconfigured or evicted
//! at runtime.

use super::RateLimiter;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub struct MultiTenantRateLimiter {
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    default_rate: f64,
    default_burst: usize,
}

impl MultiTenantRateLimiter {
    pub fn new(default_rate: f64, default_burst: usize) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            default_rate,
            default_burst,
        }
    }

    /// Returns the tenant's limiter, creating it with the defaults on first
    /// access.
    pub fn limiter(&self, tenant_id: &str) -> Arc<RateLimiter> {
        {
            let limiters = self.limiters.read().unwrap();
            if let Some(limiter) = limiters.get(tenant_id) {
                return Arc::clone(limiter);
            }
        }

        // Re-check under the write lock, another caller may have created it
        let mut limiters = self.limiters.write().unwrap();
        Arc::clone(
            limiters
                .entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(self.default_rate, self.default_burst))),
        )
    }

    /// Blocks until the tenant's limiter grants a token.
    pub async fn wait(&self, tenant_id: &str) {
        self.limiter(tenant_id).wait().await
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    pub async fn wait_timeout(&self, tenant_id: &str, timeout: Duration) -> Result<()> {
        self.limiter(tenant_id).wait_timeout(timeout).await
    }

    /// Attempts to take a token for the tenant without blocking.
    pub fn try_acquire(&self, tenant_id: &str) -> bool {
        self.limiter(tenant_id).try_acquire()
    }

    /// Sets a tenant-specific rate and burst, creating the limiter if the
    /// tenant has not been seen yet.
    pub fn set_tenant_limit(&self, tenant_id: &str, rate: f64, burst: usize) {
        let mut limiters = self.limiters.write().unwrap();
        match limiters.get(tenant_id) {
            Some(limiter) => limiter.set_rate(rate, burst),
            None => {
                limiters.insert(
                    tenant_id.to_string(),
                    Arc::new(RateLimiter::new(rate, burst)),
                );
            }
        }
    }

    /// Evicts the tenant's limiter. The next access recreates it with the
    /// defaults and a full bucket.
    pub fn remove_tenant(&self, tenant_id: &str) {
        self.limiters.write().unwrap().remove(tenant_id);
    }

    /// Number of tenants with a live limiter.
    pub fn tenant_count(&self) -> usize {
        self.limiters.read().unwrap().len()
    }
}
