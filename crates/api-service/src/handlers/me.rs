//! Current user handler.
//!
//! Returns information about the authenticated caller from the verified
//! token claims. No call is made to the identity provider.

use crate::auth::{AuthContext, Claims};
use crate::errors::ApiError;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/auth/me` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Subject (user ID).
    pub sub: String,

    /// All verified claims, unknown ones included.
    pub claims: Claims,
}

/// Handler for GET /api/auth/me
///
/// ## Response
///
/// ```json
/// {
///   "sub": "8f1c...",
///   "claims": { "sub": "8f1c...", "exp": 1234567890, "role": "authenticated" }
/// }
/// ```
#[instrument(skip_all, name = "api.handlers.me")]
pub async fn get_me(context: Option<Extension<AuthContext>>) -> Result<Json<MeResponse>, ApiError> {
    let Some(Extension(context)) = context else {
        tracing::error!(target: "api.handlers", "Me handler reached without auth context");
        return Err(ApiError::Internal);
    };

    tracing::debug!(target: "api.handlers", "Returning caller claims");

    Ok(Json(MeResponse {
        sub: context.subject,
        claims: context.claims,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_me_returns_all_claims() {
        let claims: Claims = serde_json::from_value(json!({
            "sub": "user-1",
            "exp": 1_900_000_000,
            "role": "authenticated"
        }))
        .unwrap();
        let context = AuthContext {
            subject: "user-1".to_string(),
            claims,
        };

        let Json(response) = get_me(Some(Extension(context))).await.unwrap();
        let body = serde_json::to_value(&response).unwrap();

        assert_eq!(body["sub"], "user-1");
        assert_eq!(body["claims"]["role"], "authenticated");
        assert_eq!(body["claims"]["exp"], 1_900_000_000);
    }

    #[tokio::test]
    async fn test_get_me_without_context() {
        assert!(matches!(get_me(None).await, Err(ApiError::Internal)));
    }
}
