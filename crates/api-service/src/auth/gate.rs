//! Single entry point from an `Authorization` header value to an
//! authenticated identity.

use crate::auth::claims::AuthContext;
use crate::auth::error::AuthError;
use crate::auth::verifier::SignatureVerifier;
use crate::observability::metrics;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Required scheme prefix, including the separating space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extract the compact token from an `Authorization` header value.
///
/// # Errors
///
/// - `MissingHeader` - The value is empty
/// - `MalformedHeader` - The value does not start with exactly `"Bearer "`
pub fn extract_bearer_token(header_value: &str) -> Result<&str, AuthError> {
    if header_value.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    header_value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedHeader)
}

/// Validates bearer credentials. Holds no per-call state.
#[derive(Clone)]
pub struct AuthGate {
    verifier: SignatureVerifier,
}

impl AuthGate {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    /// Validate a raw `Authorization` header value.
    ///
    /// The first failure is returned unchanged.
    ///
    /// # Errors
    ///
    /// Any `AuthError`; see the variant docs.
    #[instrument(skip_all, name = "api.auth.gate.validate")]
    pub async fn validate(&self, header_value: &str) -> Result<AuthContext, AuthError> {
        let start = Instant::now();
        let result = self.validate_inner(header_value).await;
        record_outcome(&result, start.elapsed());
        result
    }

    async fn validate_inner(&self, header_value: &str) -> Result<AuthContext, AuthError> {
        let token = extract_bearer_token(header_value)?;
        let claims = self.verifier.verify(token).await?;

        let subject = claims
            .subject()
            .map(str::to_owned)
            .ok_or(AuthError::SubjectMissing)?;

        Ok(AuthContext { subject, claims })
    }
}

fn record_outcome(result: &Result<AuthContext, AuthError>, elapsed: Duration) {
    match result {
        Ok(_) => {
            tracing::debug!(target: "api.auth.gate", "Bearer token accepted");
            metrics::record_token_validation("success", None, elapsed);
        }
        Err(e) => {
            tracing::debug!(target: "api.auth.gate", error_type = e.kind(), "Bearer token rejected");
            metrics::record_token_validation("error", Some(e.kind()), elapsed);
        }
    }
}
