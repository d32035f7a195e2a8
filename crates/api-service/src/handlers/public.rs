//! Unauthenticated demo endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Handler for GET /api/public
pub async fn public_endpoint() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "This is a public endpoint",
    })
}
