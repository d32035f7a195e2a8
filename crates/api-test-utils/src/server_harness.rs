//! Test server harness for E2E testing
//!
//! Provides `TestApiServer` for spawning a real API server whose identity
//! provider is a wiremock server publishing the fixture key set.

use crate::crypto_fixtures::default_jwks;
use api_service::auth::jwks::JWKS_PATH;
use api_service::config::Config;
use api_service::observability::metrics::init_metrics_recorder;
use api_service::routes::{self, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide metrics handle.
///
/// The first call installs the global recorder; if something else already
/// installed one, a standalone recorder is used instead.
pub fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Mount a JWKS response on `mock_server`.
///
/// With `expected_calls` set, the mock server verifies the number of fetches
/// when it is dropped.
pub async fn mount_jwks(mock_server: &MockServer, jwks: Value, expected_calls: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks));

    match expected_calls {
        Some(n) => mock.expect(n).mount(mock_server).await,
        None => mock.mount(mock_server).await,
    }
}

/// Test harness for spawning the API server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<()> {
///     let server = TestApiServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestApiServer {
    addr: SocketAddr,
    issuer: MockServer,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestApiServer {
    /// Spawn a server whose issuer serves `default_jwks()`.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let issuer = MockServer::start().await;
        mount_jwks(&issuer, default_jwks(), None).await;
        Self::spawn_with_issuer(issuer, HashMap::new()).await
    }

    /// Spawn a server against a prepared issuer mock.
    ///
    /// # Arguments
    /// * `issuer` - Mock identity provider; mount key set responses before or after spawning
    /// * `overrides` - Extra environment variables, e.g. `JWKS_CACHE_TTL_SECONDS`
    pub async fn spawn_with_issuer(
        issuer: MockServer,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("ISSUER_BASE_URL".to_string(), issuer.uri()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(AppState::new(config));

        // Build routes using api-service's real route builder
        let app = routes::build_routes(Arc::clone(&state), metrics_handle());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            issuer,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock identity provider.
    pub fn issuer(&self) -> &MockServer {
        &self.issuer
    }

    /// Shared application state, for inspecting the key set cache.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestApiServer {
    fn drop(&mut self) {
        // Abort the HTTP server task so the port is released when the test ends.
        self._handle.abort();
    }
}
