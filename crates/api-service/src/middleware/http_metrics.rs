//! Request counting and latency for every response the router produces.
//!
//! Captures metrics for every HTTP response, including ones produced
//! before a handler runs (401 from the auth middleware, 404, 405, timeouts).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Applied as the outermost layer so that rejected and timed-out requests
/// are counted too.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status_code = response.status().as_u16();
    record_http_request(&method, &path, status_code, start.elapsed());

    response
}
