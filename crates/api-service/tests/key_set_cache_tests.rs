//! Key set caching integration tests.
//!
//! Counts fetches against a mocked identity provider with wiremock
//! expectations, which are verified when the mock server is dropped.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use api_service::auth::{CacheState, FetchError, HttpKeySetSource, KeySetCache};
use api_service::auth::jwks::JWKS_PATH;
use api_test_utils::{
    default_jwks, jwks_json, mount_jwks, test_key, test_key_2, TestApiServer, TestClaimsBuilder,
    TEST_KID,
};
use futures::future::join_all;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn valid_token() -> String {
    test_key().sign(TEST_KID, &TestClaimsBuilder::new().subject("user-1").build())
}

async fn get_protected(client: &reqwest::Client, server: &TestApiServer, token: &str) -> Result<StatusCode> {
    Ok(client
        .get(format!("{}/api/protected", server.url()))
        .header("Authorization", bearer(token))
        .send()
        .await?
        .status())
}

fn http_cache(issuer: &MockServer, ttl: Duration) -> KeySetCache {
    let source = Arc::new(HttpKeySetSource::new(&issuer.uri(), Duration::from_secs(2)));
    KeySetCache::with_settings(source, ttl, Duration::from_secs(2))
}

#[tokio::test]
async fn test_single_fetch_within_ttl() -> Result<()> {
    let issuer = MockServer::start().await;
    mount_jwks(&issuer, default_jwks(), Some(1)).await;
    let server = TestApiServer::spawn_with_issuer(issuer, HashMap::new()).await?;
    let client = reqwest::Client::new();
    let token = valid_token();

    for _ in 0..5 {
        assert_eq!(get_protected(&client, &server, &token).await?, StatusCode::OK);
    }

    assert_eq!(server.state().key_set_cache.state().await, CacheState::Fresh);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() -> Result<()> {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(default_jwks())
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&issuer)
        .await;
    let server = TestApiServer::spawn_with_issuer(issuer, HashMap::new()).await?;
    let client = reqwest::Client::new();
    let token = valid_token();

    let statuses = join_all((0..20).map(|_| get_protected(&client, &server, &token))).await;

    for status in statuses {
        assert_eq!(status?, StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn test_expired_key_set_is_refetched() -> Result<()> {
    let issuer = MockServer::start().await;
    mount_jwks(&issuer, default_jwks(), Some(2)).await;
    let overrides = HashMap::from([("JWKS_CACHE_TTL_SECONDS".to_string(), "1".to_string())]);
    let server = TestApiServer::spawn_with_issuer(issuer, overrides).await?;
    let client = reqwest::Client::new();
    let token = valid_token();

    assert_eq!(get_protected(&client, &server, &token).await?, StatusCode::OK);
    assert_eq!(get_protected(&client, &server, &token).await?, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(server.state().key_set_cache.state().await, CacheState::Expired);

    assert_eq!(get_protected(&client, &server, &token).await?, StatusCode::OK);
    assert_eq!(server.state().key_set_cache.state().await, CacheState::Fresh);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_does_not_trigger_refetch() -> Result<()> {
    let issuer = MockServer::start().await;
    mount_jwks(&issuer, default_jwks(), Some(1)).await;
    let server = TestApiServer::spawn_with_issuer(issuer, HashMap::new()).await?;
    let client = reqwest::Client::new();

    assert_eq!(get_protected(&client, &server, &valid_token()).await?, StatusCode::OK);

    for i in 0..3 {
        let token = test_key().sign(&format!("unknown-{i}"), &TestClaimsBuilder::new().build());
        assert_eq!(
            get_protected(&client, &server, &token).await?,
            StatusCode::UNAUTHORIZED
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_provider_outage_fails_closed_then_recovers() -> Result<()> {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&issuer)
        .await;
    let server = TestApiServer::spawn_with_issuer(issuer, HashMap::new()).await?;
    let client = reqwest::Client::new();
    let token = valid_token();

    assert_eq!(
        get_protected(&client, &server, &token).await?,
        StatusCode::UNAUTHORIZED
    );
    let ready = client.get(format!("{}/ready", server.url())).send().await?;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.state().key_set_cache.state().await, CacheState::Empty);

    // Provider comes back: the next request fetches again
    server.issuer().reset().await;
    mount_jwks(server.issuer(), default_jwks(), Some(1)).await;

    assert_eq!(get_protected(&client, &server, &token).await?, StatusCode::OK);
    let ready = client.get(format!("{}/ready", server.url())).send().await?;
    assert_eq!(ready.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_leaves_key_set_unchanged() -> Result<()> {
    let issuer = MockServer::start().await;
    mount_jwks(&issuer, default_jwks(), Some(1)).await;
    let cache = http_cache(&issuer, Duration::from_secs(3600));

    let before = cache.get(false).await?;
    assert_eq!(before.len(), 2);

    issuer.reset().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&issuer)
        .await;

    let result = cache.get(true).await;
    assert_eq!(result.unwrap_err(), FetchError::Status(500));

    let cached = cache.cached().await.expect("previous entry should be kept");
    assert_eq!(*cached.key_set, *before);
    assert!(Arc::ptr_eq(&cached.key_set, &before));
    assert_eq!(cache.state().await, CacheState::Expired);

    // Untrusted data is never served: the next read goes back to the provider
    issuer.reset().await;
    mount_jwks(
        &issuer,
        jwks_json(&[test_key_2().jwk_json("rotated")]),
        Some(1),
    )
    .await;

    let after = cache.get(false).await?;
    assert!(after.find("rotated").is_some());
    assert!(after.find(TEST_KID).is_none());
    assert_eq!(cache.state().await, CacheState::Fresh);
    Ok(())
}

#[tokio::test]
async fn test_undecodable_key_set_is_a_fetch_error() -> Result<()> {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(2)
        .mount(&issuer)
        .await;
    let cache = http_cache(&issuer, Duration::from_secs(3600));

    assert!(matches!(cache.get(false).await, Err(FetchError::Decode(_))));
    // Failures are not cached
    assert!(matches!(cache.get(false).await, Err(FetchError::Decode(_))));
    assert_eq!(cache.state().await, CacheState::Empty);
    Ok(())
}

#[tokio::test]
async fn test_slow_provider_times_out() -> Result<()> {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(default_jwks())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&issuer)
        .await;
    let source = Arc::new(HttpKeySetSource::new(&issuer.uri(), Duration::from_secs(10)));
    let cache = KeySetCache::with_settings(source, Duration::from_secs(3600), Duration::from_millis(200));

    assert_eq!(cache.get(false).await.unwrap_err(), FetchError::Timeout);
    Ok(())
}
