//! AWS Signature Version 4 request signing.
//!
//! Builds the canonical request, derives the signing key through the keyed
//! hash chain, and attaches the `Authorization` header. Only unsigned-body
//! requests are supported; the payload hash is the digest of the empty
//! string.

use super::{AuthError, AuthProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use sha2::{Digest, Sha256};
use std::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
/// SHA-256 of the empty string.
const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone, Default)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub service: String,
}

pub struct Sigv4Auth {
    credentials: RwLock<SigningCredentials>,
}

impl Sigv4Auth {
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// Swaps in rotated credentials.
    pub fn set_credentials(&self, credentials: SigningCredentials) {
        *self.credentials.write().unwrap() = credentials;
    }

    /// Signs the request for the given instant. Inserts `x-amz-date` (and
    /// `x-amz-security-token` for temporary credentials) before computing the
    /// canonical headers so both are covered by the signature.
    pub fn sign_request(&self, request: &mut reqwest::Request, now: DateTime<Utc>) -> Result<()> {
        let credentials = self.credentials.read().unwrap().clone();
        if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
            return Err(AuthError::MissingSigningCredentials.into());
        }

        let datestamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        request.headers_mut().insert(
            HeaderName::from_static("x-amz-date"),
            HeaderValue::from_str(&amz_date).context("invalid x-amz-date value")?,
        );
        if let Some(token) = &credentials.session_token {
            request.headers_mut().insert(
                HeaderName::from_static("x-amz-security-token"),
                HeaderValue::from_str(token).context("invalid session token value")?,
            );
        }

        let url = request.url();
        let canonical_uri = if url.path().is_empty() { "/" } else { url.path() }.to_string();

        let mut query_pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        query_pairs.sort();
        let canonical_query_string = query_pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        // Signed headers: host plus every x-amz-* header, sorted by name
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let mut header_pairs: Vec<(String, String)> = vec![("host".to_string(), host)];
        for (name, value) in request.headers() {
            let name = name.as_str().to_lowercase();
            if name.starts_with("x-amz-") {
                header_pairs.push((name, value.to_str().unwrap_or_default().trim().to_string()));
            }
        }
        header_pairs.sort();

        let signed_headers = header_pairs
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = header_pairs
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();

        let canonical_request = [
            request.method().as_str(),
            &canonical_uri,
            &canonical_query_string,
            &canonical_headers,
            &signed_headers,
            EMPTY_PAYLOAD_HASH,
        ]
        .join("\n");

        let credential_scope = format!(
            "{datestamp}/{}/{}/aws4_request",
            credentials.region, credentials.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &credentials.secret_access_key,
            &datestamp,
            &credentials.region,
            &credentials.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        );
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&authorization).context("invalid authorization value")?,
        );
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for Sigv4Auth {
    async fn authenticate(&self, request: &mut reqwest::Request) -> Result<()> {
        self.sign_request(request, Utc::now())
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&self) -> Result<()> {
        // Credentials are rotated externally via set_credentials
        Ok(())
    }

    fn auth_type(&self) -> &'static str {
        "sigv4"
    }
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4"+secret, date), region), service), "aws4_request")
fn derive_signing_key(secret: &str, datestamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), datestamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials() -> SigningCredentials {
        SigningCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
            region: "us-east-1".to_string(),
            service: "execute-api".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    fn build_request(url: &str) -> reqwest::Request {
        reqwest::Client::new().get(url).build().unwrap()
    }

    #[test]
    fn test_signature_is_deterministic() {
        let auth = Sigv4Auth::new(credentials());

        let mut first = build_request("https://api.example.com/v1/items?b=2&a=1");
        auth.sign_request(&mut first, fixed_now()).unwrap();
        let mut second = build_request("https://api.example.com/v1/items?b=2&a=1");
        auth.sign_request(&mut second, fixed_now()).unwrap();

        assert_eq!(
            first.headers().get(AUTHORIZATION).unwrap(),
            second.headers().get(AUTHORIZATION).unwrap()
        );
    }

    #[test]
    fn test_authorization_header_shape() {
        let auth = Sigv4Auth::new(credentials());
        let mut request = build_request("https://api.example.com/v1/items");
        auth.sign_request(&mut request, fixed_now()).unwrap();

        assert_eq!(request.headers().get("x-amz-date").unwrap(), "20250102T030405Z");

        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20250102/us-east-1/execute-api/aws4_request"
        ));
        assert!(authorization.contains("SignedHeaders=host;x-amz-date"));
        assert!(authorization.contains("Signature="));
    }

    #[test]
    fn test_session_token_is_signed() {
        let mut with_token = credentials();
        with_token.session_token = Some("FQoGZXIvYXdzEXAMPLE".to_string());
        let auth = Sigv4Auth::new(with_token);

        let mut request = build_request("https://api.example.com/v1/items");
        auth.sign_request(&mut request, fixed_now()).unwrap();

        assert!(request.headers().contains_key("x-amz-security-token"));
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(authorization.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_secret_changes_signature() {
        let auth = Sigv4Auth::new(credentials());
        let mut first = build_request("https://api.example.com/v1/items");
        auth.sign_request(&mut first, fixed_now()).unwrap();

        let mut rotated = credentials();
        rotated.secret_access_key = "different-secret".to_string();
        auth.set_credentials(rotated);

        let mut second = build_request("https://api.example.com/v1/items");
        auth.sign_request(&mut second, fixed_now()).unwrap();

        assert_ne!(
            first.headers().get(AUTHORIZATION).unwrap(),
            second.headers().get(AUTHORIZATION).unwrap()
        );
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let auth = Sigv4Auth::new(SigningCredentials::default());
        let mut request = build_request("https://api.example.com/");
        let err = auth.sign_request(&mut request, fixed_now()).unwrap_err();
        assert!(err.downcast_ref::<AuthError>().is_some());
    }

    #[test]
    fn test_query_parameters_affect_signature() {
        let auth = Sigv4Auth::new(credentials());

        let mut first = build_request("https://api.example.com/v1/items?a=1");
        auth.sign_request(&mut first, fixed_now()).unwrap();
        let mut second = build_request("https://api.example.com/v1/items?a=2");
        auth.sign_request(&mut second, fixed_now()).unwrap();

        assert_ne!(
            first.headers().get(AUTHORIZATION).unwrap(),
            second.headers().get(AUTHORIZATION).unwrap()
        );
    }
}
