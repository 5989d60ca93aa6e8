//! Authentication providers for outbound connector requests.
//!
//! Every provider implements [`AuthProvider`] and mutates the request in
//! place. Providers with server-issued credentials (OAuth2, bearer tokens)
//! also report expiry and support refresh.

mod chained;
mod oauth;
mod sigv4;

pub use chained::ChainedAuth;
pub use oauth::{OAuth2Auth, OAuthConfig};
pub use sigv4::{Sigv4Auth, SigningCredentials};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use std::sync::RwLock;
use thiserror::Error;

/// Marker header used when the API key belongs in the request body. The SDK
/// cannot rewrite an arbitrary body, so it attaches `key_name=key` under this
/// header and the connector splices it into the payload it builds.
pub const BODY_INJECTION_HEADER: &str = "x-api-key-body-injection";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API key is not set")]
    MissingApiKey,
    #[error("username is not set")]
    MissingUsername,
    #[error("token is not set")]
    MissingToken,
    #[error("signing credentials are not set")]
    MissingSigningCredentials,
}

/// Applies credentials to an outbound request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Attaches credentials to the request, refreshing them first if needed.
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()>;

    /// Whether the current credentials are expired or about to expire.
    fn is_expired(&self) -> bool;

    /// Force-refreshes the credentials. A no-op for static providers.
    async fn refresh(&self) -> Result<()>;

    /// Short identifier for logging, e.g. `"oauth2"`.
    fn auth_type(&self) -> &'static str;
}

/// Where an API key is placed on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Header,
    Query,
    Body,
}

/// Static API key placed in a header, query parameter, or body marker.
pub struct ApiKeyAuth {
    api_key: RwLock<String>,
    location: ApiKeyLocation,
    key_name: String,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>, location: ApiKeyLocation) -> Self {
        Self {
            api_key: RwLock::new(api_key.into()),
            location,
            key_name: "X-API-Key".to_string(),
        }
    }

    /// Overrides the header or parameter name (default `X-API-Key`).
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    /// Rotates the key. Subsequent requests use the new value.
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        *self.api_key.write().unwrap() = api_key.into();
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        let api_key = self.api_key.read().unwrap().clone();
        if api_key.is_empty() {
            return Err(AuthError::MissingApiKey.into());
        }

        match self.location {
            ApiKeyLocation::Header => {
                let name = HeaderName::from_bytes(self.key_name.to_lowercase().as_bytes())
                    .with_context(|| format!("invalid API key header name '{}'", self.key_name))?;
                let value = HeaderValue::from_str(&api_key).context("invalid API key value")?;
                request.headers_mut().insert(name, value);
            }
            ApiKeyLocation::Query => {
                request
                    .url_mut()
                    .query_pairs_mut()
                    .append_pair(&self.key_name, &api_key);
            }
            ApiKeyLocation::Body => {
                let value = HeaderValue::from_str(&format!("{}={}", self.key_name, api_key))
                    .context("invalid API key value")?;
                request
                    .headers_mut()
                    .insert(HeaderName::from_static(BODY_INJECTION_HEADER), value);
            }
        }
        Ok(())
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn auth_type(&self) -> &'static str {
        "api_key"
    }
}

/// HTTP Basic authentication.
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for BasicAuth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        if self.username.is_empty() {
            return Err(AuthError::MissingUsername.into());
        }
        let encoded = BASE64.encode(format!("{}:{}", self.username, self.password));
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .context("invalid basic auth credentials")?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn auth_type(&self) -> &'static str {
        "basic"
    }
}

struct BearerState {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Externally managed bearer token, optionally with a known expiry.
pub struct BearerTokenAuth {
    state: RwLock<BearerState>,
}

impl BearerTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(BearerState {
                token: token.into(),
                expires_at: None,
            }),
        }
    }

    /// Replaces the token and its expiry.
    pub fn set_token(&self, token: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let mut state = self.state.write().unwrap();
        state.token = token.into();
        state.expires_at = expires_at;
    }

    pub fn token(&self) -> String {
        self.state.read().unwrap().token.clone()
    }
}

#[async_trait]
impl AuthProvider for BearerTokenAuth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        let token = {
            let state = self.state.read().unwrap();
            if state.token.is_empty() {
                return Err(AuthError::MissingToken.into());
            }
            state.token.clone()
        };
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("invalid bearer token value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn is_expired(&self) -> bool {
        let state = self.state.read().unwrap();
        match state.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    async fn refresh(&self) -> Result<()> {
        // The token is rotated externally via set_token
        Ok(())
    }

    fn auth_type(&self) -> &'static str {
        "bearer"
    }
}
