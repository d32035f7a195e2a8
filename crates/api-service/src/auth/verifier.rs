//! Compact JWS verification for RSA-signed bearer tokens.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256, RS384 and RS512 (RSASSA-PKCS1-v1_5) are accepted; `none`,
//!   HMAC and every other algorithm are rejected before a key is looked up
//! - The signature is checked before the payload is interpreted
//! - `exp` is required and `nbf` is honored, both with bounded clock skew

use crate::auth::claims::Claims;
use crate::auth::error::AuthError;
use crate::auth::key_resolver::KeyResolver;
use common::jwt::{decode_segment, split_compact, validate_time_claims_at};
use ring::signature::{
    RsaParameters, RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA384,
    RSA_PKCS1_2048_8192_SHA512,
};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// Accepted signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaAlgorithm {
    Rs256,
    Rs384,
    Rs512,
}

impl RsaAlgorithm {
    /// Parse the JOSE `alg` header value. Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::Rs256),
            "RS384" => Some(Self::Rs384),
            "RS512" => Some(Self::Rs512),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
        }
    }

    pub(crate) fn parameters(self) -> &'static RsaParameters {
        match self {
            Self::Rs256 => &RSA_PKCS1_2048_8192_SHA256,
            Self::Rs384 => &RSA_PKCS1_2048_8192_SHA384,
            Self::Rs512 => &RSA_PKCS1_2048_8192_SHA512,
        }
    }
}

/// Verifies tokens against keys published by the identity provider.
#[derive(Clone)]
pub struct SignatureVerifier {
    resolver: KeyResolver,

    /// Leeway applied to `exp` and `nbf`.
    clock_skew: Duration,
}

impl SignatureVerifier {
    /// Create a verifier.
    ///
    /// # Arguments
    ///
    /// * `resolver` - Resolves the header `kid` to a public key
    /// * `clock_skew` - Leeway for time claims; bounded by config to `MAX_CLOCK_SKEW`
    pub fn new(resolver: KeyResolver, clock_skew: Duration) -> Self {
        Self {
            resolver,
            clock_skew,
        }
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Verify `token` at the current time and return its claims.
    ///
    /// # Errors
    ///
    /// See [`SignatureVerifier::verify_at`].
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Verify `token` as of `now` (Unix epoch seconds).
    ///
    /// # Security Checks
    ///
    /// 1. Size and shape: three non-empty base64url segments
    /// 2. Header: JSON object with an accepted `alg` and a non-empty `kid`
    /// 3. Key: resolved by `kid` through the key set cache
    /// 4. Signature over `header.payload`
    /// 5. Payload: JSON object with valid `exp`/`nbf` and a non-empty `sub`
    ///
    /// # Errors
    ///
    /// Returns the first check that failed; see `AuthError`.
    #[instrument(skip_all)]
    pub async fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let parts = split_compact(token)?;
        let header_bytes = decode_segment(parts.header)?;
        let payload_bytes = decode_segment(parts.payload)?;
        let signature = decode_segment(parts.signature)?;

        let header: Value = serde_json::from_slice(&header_bytes).map_err(|e| {
            tracing::debug!(target: "api.auth.jwt", error = %e, "Token header is not valid JSON");
            AuthError::MalformedToken
        })?;
        let Value::Object(header) = header else {
            tracing::debug!(target: "api.auth.jwt", "Token header is not a JSON object");
            return Err(AuthError::MalformedToken);
        };

        let algorithm = header
            .get("alg")
            .and_then(Value::as_str)
            .and_then(RsaAlgorithm::from_name)
            .ok_or_else(|| {
                tracing::debug!(
                    target: "api.auth.jwt",
                    alg = ?header.get("alg"),
                    "Token rejected: unsupported algorithm"
                );
                AuthError::UnsupportedAlgorithm
            })?;

        let kid = header
            .get("kid")
            .and_then(Value::as_str)
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| {
                tracing::debug!(target: "api.auth.jwt", "Token rejected: missing kid");
                AuthError::MissingKeyId
            })?;

        let key = self.resolver.resolve(kid).await?;

        if !key.verify(algorithm, parts.signing_input.as_bytes(), &signature) {
            tracing::debug!(
                target: "api.auth.jwt",
                alg = algorithm.name(),
                kid = %kid,
                "Token rejected: signature verification failed"
            );
            return Err(AuthError::SignatureInvalid);
        }

        let claims: Claims = serde_json::from_slice(&payload_bytes).map_err(|e| {
            tracing::debug!(target: "api.auth.jwt", error = %e, "Token payload is not a JSON object");
            AuthError::MalformedToken
        })?;

        validate_time_claims_at(
            claims.expires_at()?,
            claims.not_before()?,
            self.clock_skew,
            now,
        )?;

        if claims.subject().is_none() {
            tracing::debug!(target: "api.auth.jwt", "Token rejected: missing subject");
            return Err(AuthError::SubjectMissing);
        }

        tracing::debug!(target: "api.auth.jwt", alg = algorithm.name(), "Token verified");
        Ok(claims)
    }
}
