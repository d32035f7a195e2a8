//! JWKS document types and the HTTP key set source.
//!
//! The identity provider publishes its signing keys at
//! `{issuer}/auth/v1/jwks`. This module only knows how to fetch and decode
//! that document; caching, freshness and single-flight live in
//! [`crate::auth::key_set_cache`].
//!
//! # Security
//!
//! - Every fetch is bounded by a request timeout
//! - Non-2xx responses and undecodable bodies are errors, never an empty set
//! - HTTPS should be used in production (enforced by deployment config)

use crate::auth::error::FetchError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Path of the key set endpoint relative to the issuer base URL.
pub const JWKS_PATH: &str = "/auth/v1/jwks";

/// Connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry of the published key set.
///
/// `n` and `e` are kept exactly as published (base64url of the big-endian
/// bytes); they are decoded when a key is resolved. Missing fields decode as
/// empty strings so that one unusable entry does not invalidate the set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyDescriptor {
    /// Key type (expected "RSA").
    #[serde(default)]
    pub kty: String,

    /// Key ID, matched against the token header `kid`.
    #[serde(default)]
    pub kid: String,

    /// Intended key use (expected "sig").
    #[serde(default, rename = "use")]
    pub key_use: String,

    /// RSA modulus, base64url.
    #[serde(default)]
    pub n: String,

    /// RSA public exponent, base64url.
    #[serde(default)]
    pub e: String,
}

/// Immutable set of keys from one successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct KeySet {
    keys: Vec<KeyDescriptor>,
}

impl KeySet {
    pub fn new(keys: Vec<KeyDescriptor>) -> Self {
        Self { keys }
    }

    /// First key published under `kid`.
    pub fn find(&self, kid: &str) -> Option<&KeyDescriptor> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyDescriptor> {
        self.keys.iter()
    }
}

/// A place key sets can be fetched from.
///
/// One call is one fetch attempt: implementations must not cache or retry.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<KeySet, FetchError>;
}

/// Fetches the key set from the identity provider over HTTP.
pub struct HttpKeySetSource {
    /// Full URL of the JWKS endpoint.
    jwks_url: String,

    /// HTTP client with request timeout applied.
    http_client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for the issuer at `issuer_base_url`.
    ///
    /// # Arguments
    ///
    /// * `issuer_base_url` - Base URL of the identity provider; a trailing `/` is ignored
    /// * `timeout` - Upper bound for a whole fetch (connect, send, read body)
    pub fn new(issuer_base_url: &str, timeout: Duration) -> Self {
        let jwks_url = jwks_url(issuer_base_url);

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "api.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

/// Build the JWKS endpoint URL from the issuer base URL.
pub fn jwks_url(issuer_base_url: &str) -> String {
    format!("{}{}", issuer_base_url.trim_end_matches('/'), JWKS_PATH)
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    #[instrument(skip(self), fields(url = %self.jwks_url))]
    async fn fetch(&self) -> Result<KeySet, FetchError> {
        tracing::debug!(target: "api.auth.jwks", "Fetching JWKS from issuer");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "api.auth.jwks", error = %e, "Failed to fetch JWKS");
                classify_reqwest_error(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "api.auth.jwks",
                status = %status,
                "JWKS endpoint returned error"
            );
            return Err(FetchError::Status(status.as_u16()));
        }

        let key_set: KeySet = response.json().await.map_err(|e| {
            tracing::error!(target: "api.auth.jwks", error = %e, "Failed to parse JWKS response");
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Decode(e.to_string())
            }
        })?;

        tracing::debug!(
            target: "api.auth.jwks",
            key_count = key_set.len(),
            "JWKS fetched"
        );

        Ok(key_set)
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Request(err.to_string())
    }
}

/// Source that always returns the same key set. Unit tests only.
#[cfg(test)]
pub(crate) struct StaticKeySetSource(pub KeySet);

#[cfg(test)]
#[async_trait]
impl KeySetSource for StaticKeySetSource {
    async fn fetch(&self) -> Result<KeySet, FetchError> {
        Ok(self.0.clone())
    }
}
