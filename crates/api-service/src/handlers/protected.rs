//! Demo endpoint behind the auth middleware.

use crate::auth::AuthContext;
use crate::errors::ApiError;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedResponse {
    pub message: &'static str,
    pub user_id: String,
}

/// Handler for GET /api/protected
///
/// Returns the caller's subject. Without an `AuthContext` the route was
/// mounted without the auth middleware, which is a server bug (500).
#[instrument(skip_all, name = "api.handlers.protected")]
pub async fn protected_endpoint(
    context: Option<Extension<AuthContext>>,
) -> Result<Json<ProtectedResponse>, ApiError> {
    let Some(Extension(context)) = context else {
        tracing::error!(target: "api.handlers", "Protected handler reached without auth context");
        return Err(ApiError::Internal);
    };

    Ok(Json(ProtectedResponse {
        message: "This is a protected endpoint",
        user_id: context.subject,
    }))
}
