//! JWT utilities shared across services.
//!
//! This module provides the low-level building blocks of compact-token
//! verification that do not depend on a key source:
//! - Size limits for DoS prevention
//! - Clock skew constants for time-claim validation
//! - Compact serialization splitting and segment decoding
//! - Explicit `exp` / `nbf` validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE splitting or decoding (DoS prevention)
//! - Segment decoding is strict (unpadded base64url only)
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{split_compact, decode_segment, validate_time_claims, DEFAULT_CLOCK_SKEW};
//!
//! let parts = split_compact(token)?;
//! let header = decode_segment(parts.header)?;
//!
//! // After signature verification
//! validate_time_claims(exp, nbf, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{
    alphabet,
    engine::{
        general_purpose::URL_SAFE_NO_PAD, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig,
    },
    Engine,
};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - Typical RS256 access tokens are 700-1200 bytes
/// - 8KB allows for large custom claim sets while preventing abuse
/// - Checked BEFORE base64 decode and signature verification
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock skew tolerance applied to `exp` and `nbf`.
///
/// Zero: a token is expired the instant its `exp` is reached.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::ZERO;

/// Maximum allowed clock skew tolerance (10 minutes).
///
/// This prevents misconfiguration that could weaken security by allowing
/// excessively large clock skew tolerance.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Base64url engine that accepts input with or without trailing padding.
///
/// Key material published in a JWKS is usually unpadded, but some providers
/// emit padded values.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during structural or time-claim validation.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not three non-empty base64url segments).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token has no `exp` claim.
    #[error("The access token is invalid or expired")]
    MissingExpiry,

    /// Token `exp` has passed.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `nbf` is still in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,
}

// =============================================================================
// Compact serialization
// =============================================================================

/// The three segments of a compact JWS, still base64url encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactParts<'a> {
    /// Encoded protected header.
    pub header: &'a str,

    /// Encoded payload.
    pub payload: &'a str,

    /// Encoded signature.
    pub signature: &'a str,

    /// `header "." payload`, the exact bytes covered by the signature.
    pub signing_input: &'a str,
}

/// Split a compact token into its three segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not exactly three dot-separated, non-empty segments
pub fn split_compact(token: &str) -> Result<CompactParts<'_>, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;
    let (header, payload) = signing_input
        .split_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;

    if payload.contains('.') {
        tracing::debug!(target: "common.jwt", "Token rejected: too many segments");
        return Err(JwtValidationError::MalformedToken);
    }

    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty segment");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(CompactParts {
        header,
        payload,
        signature,
        signing_input,
    })
}

/// Decode one compact-serialization segment (unpadded base64url).
///
/// # Errors
///
/// Returns `MalformedToken` if the segment is not valid unpadded base64url.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>, JwtValidationError> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })
}

/// Decode a base64url value from a JWK field, restoring padding as needed.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the content is not valid base64url.
pub fn decode_base64url_lenient(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(value)
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate `exp` and `nbf` against the current time.
///
/// # Errors
///
/// See [`validate_time_claims_at`].
pub fn validate_time_claims(
    exp: Option<i64>,
    nbf: Option<i64>,
    clock_skew: Duration,
) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_time_claims_at(exp, nbf, clock_skew, now)
}

/// Deterministic time-claim validation against an explicit `now` timestamp.
///
/// Rules (all values are Unix epoch seconds):
/// - `exp` is required; the token is valid while `now < exp + clock_skew`
/// - `nbf` is optional; when present the token is valid once `nbf <= now + clock_skew`
///
/// # Errors
///
/// - `MissingExpiry` - `exp` is absent
/// - `Expired` - `exp` has passed
/// - `NotYetValid` - `nbf` is in the future
pub fn validate_time_claims_at(
    exp: Option<i64>,
    nbf: Option<i64>,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds) by config
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;

    let exp = exp.ok_or_else(|| {
        tracing::debug!(target: "common.jwt", "Token rejected: missing exp claim");
        JwtValidationError::MissingExpiry
    })?;

    if now >= exp.saturating_add(clock_skew_secs) {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    if let Some(nbf) = nbf {
        if nbf > now.saturating_add(clock_skew_secs) {
            tracing::debug!(
                target: "common.jwt",
                nbf = nbf,
                now = now,
                clock_skew_secs = clock_skew_secs,
                "Token rejected: not yet valid"
            );
            return Err(JwtValidationError::NotYetValid);
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
