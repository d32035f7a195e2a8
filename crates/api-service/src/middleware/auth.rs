//! Authentication middleware for protected routes.
//!
//! Hands the `Authorization` header to the auth gate and injects the
//! resulting `AuthContext` into request extensions.

use crate::auth::{AuthContext, AuthError, AuthGate};
use crate::errors::ApiError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub gate: AuthGate,
}

/// Authentication middleware that validates bearer tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with WWW-Authenticate header if the token is missing or invalid
/// - Continues to the next handler with `AuthContext` in extensions if the token is valid
#[instrument(skip(state, req, next), name = "api.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let header_value = authorization_header(&req)?;

    let context = state.gate.validate(header_value).await.map_err(|e| {
        tracing::debug!(target: "api.middleware.auth", error_type = e.kind(), "Request rejected");
        ApiError::from(e)
    })?;

    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}

/// Raw `Authorization` header value; absent reads as empty.
///
/// # Errors
///
/// Returns `MalformedHeader` if the value is not visible ASCII.
pub fn authorization_header<B>(req: &axum::http::Request<B>) -> Result<&str, AuthError> {
    match req.headers().get(AUTHORIZATION) {
        None => Ok(""),
        Some(value) => value.to_str().map_err(|_| {
            tracing::debug!(target: "api.middleware.auth", "Authorization header is not valid ASCII");
            AuthError::MalformedHeader
        }),
    }
}

/// Extension trait for extracting the auth context from a request.
pub trait AuthContextExt {
    /// Returns `None` if the auth middleware was not applied to this request.
    fn auth_context(&self) -> Option<&AuthContext>;
}

impl<B> AuthContextExt for axum::http::Request<B> {
    fn auth_context(&self) -> Option<&AuthContext> {
        self.extensions().get::<AuthContext>()
    }
}
