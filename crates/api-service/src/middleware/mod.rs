//! HTTP middleware for the API service.

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthContextExt, AuthState};
pub use http_metrics::http_metrics_middleware;
