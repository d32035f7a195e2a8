//! API service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are intentionally generic; the detailed failure kind is
//! logged server-side.

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Generic client message for every token-level failure.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// API service error type.
///
/// Maps to HTTP status codes:
/// - Unauthenticated: 401 Unauthorized
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Unauthenticated(_) => 401,
            ApiError::Internal => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthenticated(err) => {
                let (code, message) = match err {
                    AuthError::MissingHeader | AuthError::MalformedHeader => {
                        ("INVALID_REQUEST", err.to_string())
                    }
                    AuthError::Fetch(fetch) => {
                        // Provider outage: still 401, but worth an operator's attention
                        tracing::warn!(target: "api.errors", error = %fetch, "Rejected request: signing keys unavailable");
                        ("INVALID_TOKEN", INVALID_TOKEN_MESSAGE.to_string())
                    }
                    _ => ("INVALID_TOKEN", INVALID_TOKEN_MESSAGE.to_string()),
                };
                (StatusCode::UNAUTHORIZED, code, message)
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            let challenge = match &self {
                ApiError::Unauthenticated(AuthError::MissingHeader) => {
                    "Bearer realm=\"api\"".to_string()
                }
                ApiError::Unauthenticated(AuthError::MalformedHeader) => {
                    "Bearer realm=\"api\", error=\"invalid_request\"".to_string()
                }
                _ => "Bearer realm=\"api\", error=\"invalid_token\"".to_string(),
            };
            if let Ok(header_value) = challenge.parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
