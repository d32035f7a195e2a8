//! Session check endpoint.
//!
//! Unlike protected routes this never returns an error body: clients only
//! learn whether their credentials are currently accepted.

use crate::middleware::auth::authorization_header;
use crate::routes::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub authenticated: bool,
}

/// Handler for GET /api/auth/verify
///
/// Returns 200 `{"authenticated": true}` for a valid bearer token and
/// 401 `{"authenticated": false}` for anything else.
#[instrument(skip_all, name = "api.handlers.verify")]
pub async fn verify_session(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> (StatusCode, Json<VerifyResponse>) {
    let result = match authorization_header(&req) {
        Ok(header_value) => state.gate.validate(header_value).await.map(|_| ()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(VerifyResponse { authenticated: true })),
        Err(e) => {
            tracing::debug!(target: "api.handlers", error_type = e.kind(), "Session not authenticated");
            (
                StatusCode::UNAUTHORIZED,
                Json(VerifyResponse {
                    authenticated: false,
                }),
            )
        }
    }
}
