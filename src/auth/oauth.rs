//! OAuth2 client-credentials authentication.
//!
//! Tokens are fetched lazily on first use and refreshed ahead of expiry with
//! a safety skew. Concurrent refreshes are collapsed into a single token
//! request behind an async gate.

use super::AuthProvider;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::sync::RwLock;

/// Tokens are treated as expired this many seconds before their actual
/// expiry to absorb clock skew and request latency.
const EXPIRY_SKEW_SECONDS: i64 = 30;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

#[derive(Default)]
struct TokenState {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct OAuth2Auth {
    config: OAuthConfig,
    http: reqwest::Client,
    token: RwLock<TokenState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl OAuth2Auth {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            token: RwLock::new(TokenState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Seeds the token state directly, bypassing the token endpoint.
    pub fn set_token(&self, access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let mut token = self.token.write().unwrap();
        token.access_token = access_token.into();
        token.expires_at = expires_at;
    }

    fn needs_refresh(&self) -> bool {
        let token = self.token.read().unwrap();
        if token.access_token.is_empty() {
            return true;
        }
        match token.expires_at {
            Some(expires_at) => {
                Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECONDS) >= expires_at
            }
            None => false,
        }
    }

    /// Returns a valid access token, fetching one if the cached token is
    /// missing or near expiry. Holding the gate across the re-check and the
    /// fetch collapses concurrent refreshes into one request.
    async fn ensure_fresh(&self) -> Result<String> {
        if !self.needs_refresh() {
            return Ok(self.token.read().unwrap().access_token.clone());
        }

        let _gate = self.refresh_gate.lock().await;
        if !self.needs_refresh() {
            return Ok(self.token.read().unwrap().access_token.clone());
        }

        self.fetch_token().await?;
        Ok(self.token.read().unwrap().access_token.clone())
    }

    async fn fetch_token(&self) -> Result<()> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        if !self.config.scopes.is_empty() {
            form.push(("scope", self.config.scopes.join(" ")));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("requesting token from {}", self.config.token_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .context("parsing token endpoint response")?;

        let expires_at = parsed
            .expires_in
            .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds));

        {
            let mut token = self.token.write().unwrap();
            token.access_token = parsed.access_token;
            token.expires_at = expires_at;
        }

        tracing::debug!(
            token_url = %self.config.token_url,
            expires_in = ?parsed.expires_in,
            "fetched OAuth2 access token"
        );
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for OAuth2Auth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        let token = self.ensure_fresh().await?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("invalid access token value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.needs_refresh()
    }

    async fn refresh(&self) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;
        self.fetch_token().await
    }

    fn auth_type(&self) -> &'static str {
        "oauth2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use mockito::Matcher;
    use std::sync::Arc;

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "shh".to_string(),
            token_url,
            scopes: vec!["read".to_string(), "write".to_string()],
        }
    }

    fn build_request() -> reqwest::Request {
        reqwest::Client::new()
            .get("https://api.example.com/")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetches_token_and_sets_bearer_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "client-1".into()),
                Matcher::UrlEncoded("client_secret".into(), "shh".into()),
                Matcher::UrlEncoded("scope".into(), "read write".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-abc","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let auth = OAuth2Auth::new(config(format!("{}/oauth/token", server.url())));
        let mut request = build_request();
        auth.authenticate(&mut request).await.unwrap();

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer tok-abc"
        );
        assert!(!auth.is_expired());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_authenticates_fetch_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-once","expires_in":3600,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = Arc::new(OAuth2Auth::new(config(format!(
            "{}/oauth/token",
            server.url()
        ))));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move {
                    let mut request = reqwest::Client::new()
                        .get("https://api.example.com/")
                        .build()
                        .unwrap();
                    auth.authenticate(&mut request).await.unwrap();
                })
            })
            .collect();
        join_all(tasks).await.into_iter().for_each(|r| r.unwrap());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_from_token_endpoint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let auth = OAuth2Auth::new(config(format!("{}/oauth/token", server.url())));
        let mut request = build_request();
        let err = auth.authenticate(&mut request).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_expired_before_any_token() {
        let auth = OAuth2Auth::new(config("http://127.0.0.1:1/never".to_string()));
        assert!(auth.is_expired());
    }

    #[tokio::test]
    async fn test_seeded_token_skips_endpoint_until_expiry() {
        let auth = OAuth2Auth::new(config("http://127.0.0.1:1/never".to_string()));

        auth.set_token("seeded", Some(Utc::now() + ChronoDuration::hours(1)));
        assert!(!auth.is_expired());

        let mut request = build_request();
        auth.authenticate(&mut request).await.unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer seeded"
        );

        // Within the skew window the token counts as expired
        auth.set_token("seeded", Some(Utc::now() + ChronoDuration::seconds(10)));
        assert!(auth.is_expired());
    }

    #[test]
    fn test_token_response_deserialization() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":120,"token_type":"Bearer"}"#)
                .unwrap();
        assert_eq!(parsed.access_token, "t");
        assert_eq!(parsed.expires_in, Some(120));
        assert_eq!(parsed.token_type.as_deref(), Some("Bearer"));

        let minimal: TokenResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(minimal.expires_in, None);
    }
}
