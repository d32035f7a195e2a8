//! HTTP routes for the API service.
//!
//! Defines the Axum router and application state.

use crate::auth::{
    AuthGate, HttpKeySetSource, KeyResolver, KeySetCache, KeySetSource, SignatureVerifier,
};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Request timeout applied to every route.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Process-wide key set cache; shared with the gate.
    pub key_set_cache: Arc<KeySetCache>,

    /// Bearer-token gate used by the auth middleware and `/api/auth/verify`.
    pub gate: AuthGate,
}

impl AppState {
    /// Build state that fetches keys from `config.issuer_base_url`.
    pub fn new(config: Config) -> Self {
        let source = Arc::new(HttpKeySetSource::new(
            &config.issuer_base_url,
            config.jwks_fetch_timeout,
        ));
        Self::with_source(config, source)
    }

    /// Build state around an explicit key set source.
    pub fn with_source(config: Config, source: Arc<dyn KeySetSource>) -> Self {
        let key_set_cache = Arc::new(KeySetCache::with_settings(
            source,
            config.jwks_cache_ttl,
            config.jwks_fetch_timeout,
        ));
        let resolver = KeyResolver::new(Arc::clone(&key_set_cache));
        let verifier = SignatureVerifier::new(resolver, config.jwt_clock_skew);

        Self {
            config,
            key_set_cache,
            gate: AuthGate::new(verifier),
        }
    }
}

/// CORS policy: any origin, the methods and headers browser clients use.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-csrf-token"),
        ])
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe - public
/// - `/ready` - Readiness probe (key set available) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/public` - Demo endpoint - public
/// - `/api/auth/verify` - Reports whether the caller's token is valid - public
/// - `/api/protected` - Demo endpoint - requires authentication
/// - `/api/auth/me` - Current caller's claims - requires authentication
/// - CORS, TraceLayer for request logging, 30 second request timeout
/// - HTTP metrics middleware
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        gate: state.gate.clone(),
    });

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/public", get(handlers::public_endpoint))
        .route("/api/auth/verify", get(handlers::verify_session))
        .with_state(Arc::clone(&state));

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/api/protected", get(handlers::protected_endpoint))
        .route("/api/auth/me", get(handlers::get_me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. CorsLayer - Answer preflights before auth runs
    // 4. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(middleware::from_fn(http_metrics_middleware))
}
