//! API service configuration.
//!
//! Configuration is loaded once from environment variables at startup.
//! Nothing here is secret, so the derived Debug output is safe to log.

use crate::auth::key_set_cache::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_SET_TTL, MAX_KEY_SET_TTL};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Upper bound for `JWKS_FETCH_TIMEOUT_SECONDS`.
pub const MAX_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// API service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the identity provider; keys are fetched from
    /// `{issuer_base_url}/auth/v1/jwks`.
    pub issuer_base_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// How long a fetched key set is trusted (default: 24h).
    pub jwks_cache_ttl: Duration,

    /// Upper bound for one key set fetch (default: 10s).
    pub jwks_fetch_timeout: Duration,

    /// Leeway applied to `exp` and `nbf` (default: 0).
    pub jwt_clock_skew: Duration,

    /// Pause between failing readiness and stopping the server (default: 0).
    pub shutdown_drain: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer URL: {0}")]
    InvalidIssuerUrl(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidCacheTtl(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidFetchTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid shutdown drain configuration: {0}")]
    InvalidShutdownDrain(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer_base_url = vars
            .get("ISSUER_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("ISSUER_BASE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        if !issuer_base_url.starts_with("http://") && !issuer_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidIssuerUrl(format!(
                "ISSUER_BASE_URL must start with http:// or https://, got '{issuer_base_url}'"
            )));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Parse cache TTL with validation
        let jwks_cache_ttl = if let Some(value_str) = vars.get("JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidCacheTtl(format!(
                    "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if !(1..=MAX_KEY_SET_TTL.as_secs()).contains(&value) {
                return Err(ConfigError::InvalidCacheTtl(format!(
                    "JWKS_CACHE_TTL_SECONDS must be between 1 and {}, got {value}",
                    MAX_KEY_SET_TTL.as_secs()
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_KEY_SET_TTL
        };

        // Parse fetch timeout with validation
        let jwks_fetch_timeout = if let Some(value_str) = vars.get("JWKS_FETCH_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if !(1..=MAX_FETCH_TIMEOUT_SECONDS).contains(&value) {
                return Err(ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be between 1 and {MAX_FETCH_TIMEOUT_SECONDS}, got {value}"
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_FETCH_TIMEOUT
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })?;

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                    MAX_CLOCK_SKEW.as_secs()
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let shutdown_drain = match vars.get("SHUTDOWN_DRAIN_SECONDS") {
            Some(value_str) => Duration::from_secs(value_str.parse().map_err(|e| {
                ConfigError::InvalidShutdownDrain(format!(
                    "SHUTDOWN_DRAIN_SECONDS must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })?),
            None => Duration::ZERO,
        };

        Ok(Config {
            issuer_base_url,
            bind_address,
            jwks_cache_ttl,
            jwks_fetch_timeout,
            jwt_clock_skew,
            shutdown_drain,
        })
    }
}
