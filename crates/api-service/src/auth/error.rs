//! Error taxonomy for bearer-token verification.
//!
//! Every failure inside the auth core is one of these kinds. The HTTP
//! boundary maps all of them to 401 (see `crate::errors::ApiError`); the
//! kind itself is only logged and used as a bounded metrics label.

use common::jwt::JwtValidationError;
use thiserror::Error;

/// Failure to obtain a key set from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    #[error("key set request failed: {0}")]
    Request(String),

    /// The fetch did not complete within the configured timeout.
    #[error("key set request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status.
    #[error("key set endpoint returned status {0}")]
    Status(u16),

    /// The body was not a valid key set document.
    #[error("key set response could not be decoded: {0}")]
    Decode(String),

    /// The fetch task ended without publishing a result.
    #[error("key set fetch was aborted")]
    Aborted,
}

/// Bearer-token verification error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,

    #[error("Invalid Authorization header format")]
    MalformedHeader,

    #[error("Token is malformed")]
    MalformedToken,

    #[error("Token signing algorithm is not supported")]
    UnsupportedAlgorithm,

    #[error("Token header has no key ID")]
    MissingKeyId,

    #[error("Token signing key was not found")]
    KeyNotFound,

    #[error("Signing key material is invalid")]
    InvalidKeyMaterial,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Token signature is invalid")]
    SignatureInvalid,

    #[error("Token has expired")]
    ClaimsExpired,

    #[error("Token is not yet valid")]
    ClaimsNotYetValid,

    #[error("Token has no subject")]
    SubjectMissing,
}

impl AuthError {
    /// Stable, low-cardinality name of the error kind for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnsupportedAlgorithm => "unsupported_algorithm",
            AuthError::MissingKeyId => "missing_key_id",
            AuthError::KeyNotFound => "key_not_found",
            AuthError::InvalidKeyMaterial => "invalid_key_material",
            AuthError::Fetch(_) => "fetch_error",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::ClaimsExpired => "claims_expired",
            AuthError::ClaimsNotYetValid => "claims_not_yet_valid",
            AuthError::SubjectMissing => "subject_missing",
        }
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                AuthError::MalformedToken
            }
            // A token without an expiry cannot be shown to be unexpired.
            JwtValidationError::MissingExpiry | JwtValidationError::Expired => {
                AuthError::ClaimsExpired
            }
            JwtValidationError::NotYetValid => AuthError::ClaimsNotYetValid,
        }
    }
}
