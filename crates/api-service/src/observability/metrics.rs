//! Metrics definitions for the API service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `api_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: known static paths, everything else is `/other`
//! - `status`: 3 values (success, error, timeout)
//! - `result`: 3 values (hit, fetch, joined)
//! - `error_type`: bounded by `AuthError::kind()`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("api_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Token validation is CPU-bound except on a cache miss
        .set_buckets_for_metric(
            Matcher::Prefix("api_token_validation".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("api_jwks_fetch".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `api_http_requests_total`, `api_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("api_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("api_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/public" => "/api/public",
        "/api/protected" => "/api/protected",
        "/api/auth/me" => "/api/auth/me",
        "/api/auth/verify" => "/api/auth/verify",
        _ => "/other",
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record the outcome of one bearer-token validation.
///
/// Metric: `api_token_validations_total`, `api_token_validation_duration_seconds`
/// Labels: `status`, `error_type`
///
/// Status values: "success", "error"
pub fn record_token_validation(status: &str, error_type: Option<&'static str>, duration: Duration) {
    histogram!("api_token_validation_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("api_token_validations_total",
        "status" => status.to_string(),
        "error_type" => error_type.unwrap_or("none")
    )
    .increment(1);
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Record one key set fetch against the identity provider.
///
/// Metric: `api_jwks_fetch_total`, `api_jwks_fetch_duration_seconds`
/// Labels: `status` ("success", "error")
pub fn record_key_set_fetch(status: &str, duration: Duration) {
    histogram!("api_jwks_fetch_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("api_jwks_fetch_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record how a key set lookup was satisfied.
///
/// Metric: `api_jwks_cache_lookups_total`
/// Labels: `result` ("hit", "fetch", "joined")
pub fn record_key_set_lookup(result: &'static str) {
    counter!("api_jwks_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}
