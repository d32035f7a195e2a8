//! Process-wide cache of the identity provider's key set.
//!
//! # Behavior
//!
//! - A populated, trusted, unexpired entry is served without I/O
//! - Otherwise one fetch is started; every caller that arrives while it is in
//!   flight waits for and shares its result (single-flight)
//! - A successful fetch replaces the entry wholesale, key data and expiry
//!   together under one lock
//! - A failed fetch leaves the previous entry untouched but marks it
//!   untrusted, so the next read fetches again (fail-closed)
//!
//! The fetch runs on its own task: a caller that stops waiting (request
//! cancelled) does not cancel the fetch other callers depend on.

use crate::auth::error::FetchError;
use crate::auth::jwks::{KeySet, KeySetSource};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::instrument;

/// Default key set TTL (24 hours), the provider's rotation cadence.
pub const DEFAULT_KEY_SET_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest TTL a cache accepts; larger values are clamped.
pub const MAX_KEY_SET_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default upper bound for one key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

type FetchOutcome = Result<Arc<KeySet>, FetchError>;

/// Key set plus the window in which it may be served.
#[derive(Debug, Clone)]
pub struct CachedKeySet {
    pub key_set: Arc<KeySet>,
    pub fetched_at: Instant,
    pub expires_at: Instant,
}

impl CachedKeySet {
    /// A window that cannot be represented is empty: the entry is never fresh.
    fn new(key_set: Arc<KeySet>, fetched_at: Instant, ttl: Duration) -> Self {
        Self {
            key_set,
            fetched_at,
            expires_at: fetched_at.checked_add(ttl).unwrap_or(fetched_at),
        }
    }

    /// Whether `now` falls inside `[fetched_at, expires_at)`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now >= self.fetched_at && now < self.expires_at
    }
}

/// Externally observable cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No fetch has ever succeeded.
    Empty,
    /// Holds a key set that may be served without I/O.
    Fresh,
    /// Holds a key set that must be refreshed before it is trusted again.
    Expired,
}

#[derive(Default)]
struct Inner {
    current: Option<CachedKeySet>,

    /// Cleared when a refresh fails; stale data is never served.
    trusted: bool,

    /// Result channel of the fetch in flight, if any.
    in_flight: Option<watch::Receiver<Option<FetchOutcome>>>,
}

impl Inner {
    fn servable_at(&self, now: Instant) -> Option<Arc<KeySet>> {
        match &self.current {
            Some(cached) if self.trusted && cached.is_fresh_at(now) => {
                Some(Arc::clone(&cached.key_set))
            }
            _ => None,
        }
    }
}

/// Thread-safe key set cache with single-flight refresh.
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    fetch_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl KeySetCache {
    /// Create a cache with the default TTL and fetch timeout.
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self::with_settings(source, DEFAULT_KEY_SET_TTL, DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a cache with a custom TTL and fetch timeout.
    ///
    /// # Arguments
    ///
    /// * `source` - Where key sets are fetched from
    /// * `ttl` - How long a fetched key set is served before refreshing, at most `MAX_KEY_SET_TTL`
    /// * `fetch_timeout` - Upper bound for one fetch; a timeout is a fetch failure
    pub fn with_settings(
        source: Arc<dyn KeySetSource>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            ttl: ttl.min(MAX_KEY_SET_TTL),
            fetch_timeout,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get the key set, fetching it if the cache cannot serve it.
    ///
    /// # Arguments
    ///
    /// * `force_refresh` - Fetch even if the cached entry is still fresh
    ///
    /// # Errors
    ///
    /// Returns the `FetchError` of the fetch this call started or joined.
    #[instrument(skip(self), name = "api.auth.cache.get")]
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<KeySet>, FetchError> {
        let mut receiver = {
            let mut inner = self.inner.lock().await;

            if !force_refresh {
                if let Some(key_set) = inner.servable_at(Instant::now()) {
                    tracing::trace!(target: "api.auth.cache", "Key set cache hit");
                    metrics::record_key_set_lookup("hit");
                    return Ok(key_set);
                }
            }

            if let Some(receiver) = inner.in_flight.clone() {
                tracing::debug!(target: "api.auth.cache", "Joining in-flight key set fetch");
                metrics::record_key_set_lookup("joined");
                receiver
            } else {
                metrics::record_key_set_lookup("fetch");
                self.start_refresh(&mut inner)
            }
        };

        let published = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());

        match published {
            Ok(outcome) => outcome.unwrap_or(Err(FetchError::Aborted)),
            Err(_) => {
                tracing::error!(target: "api.auth.cache", "Key set fetch task ended without a result");
                self.release_abandoned(&receiver).await;
                Err(FetchError::Aborted)
            }
        }
    }

    /// Current state, evaluated lazily against the clock.
    pub async fn state(&self) -> CacheState {
        let inner = self.inner.lock().await;
        match &inner.current {
            None => CacheState::Empty,
            Some(_) if inner.servable_at(Instant::now()).is_some() => CacheState::Fresh,
            Some(_) => CacheState::Expired,
        }
    }

    /// Snapshot of the cached entry, regardless of freshness.
    pub async fn cached(&self) -> Option<CachedKeySet> {
        self.inner.lock().await.current.clone()
    }

    /// Unregister a fetch whose task died before publishing, so the next
    /// read starts a new one.
    async fn release_abandoned(&self, receiver: &watch::Receiver<Option<FetchOutcome>>) {
        let mut inner = self.inner.lock().await;
        if inner
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.same_channel(receiver))
        {
            inner.in_flight = None;
            inner.trusted = false;
        }
    }

    /// Spawn the fetch task and register it as in flight.
    ///
    /// Must be called with the lock held and no fetch in flight.
    fn start_refresh(&self, inner: &mut Inner) -> watch::Receiver<Option<FetchOutcome>> {
        let (sender, receiver) = watch::channel(None);
        inner.in_flight = Some(receiver.clone());

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.inner);
        let ttl = self.ttl;
        let fetch_timeout = self.fetch_timeout;

        tokio::spawn(async move {
            let started = Instant::now();

            // The source runs on its own task so a panic inside it still
            // reaches the bookkeeping below.
            let fetch = tokio::spawn(async move {
                tokio::time::timeout(fetch_timeout, source.fetch()).await
            });
            let outcome = match fetch.await {
                Ok(Ok(result)) => result.map(Arc::new),
                Ok(Err(_)) => Err(FetchError::Timeout),
                Err(e) => {
                    tracing::error!(target: "api.auth.cache", error = %e, "Key set fetch task failed");
                    Err(FetchError::Aborted)
                }
            };
            let elapsed = started.elapsed();

            let mut inner = shared.lock().await;
            match &outcome {
                Ok(key_set) => {
                    inner.current =
                        Some(CachedKeySet::new(Arc::clone(key_set), Instant::now(), ttl));
                    inner.trusted = true;
                    tracing::info!(
                        target: "api.auth.cache",
                        key_count = key_set.len(),
                        ttl_secs = ttl.as_secs(),
                        "Key set cache refreshed"
                    );
                    metrics::record_key_set_fetch("success", elapsed);
                }
                Err(e) => {
                    inner.trusted = false;
                    tracing::warn!(
                        target: "api.auth.cache",
                        error = %e,
                        has_previous = inner.current.is_some(),
                        "Key set refresh failed, previous entry kept but untrusted"
                    );
                    metrics::record_key_set_fetch("error", elapsed);
                }
            }
            inner.in_flight = None;

            // Published under the lock: whoever locks next sees the new state.
            sender.send_replace(Some(outcome));
        });

        receiver
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::jwks::KeyDescriptor;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted key set source that counts fetches.
    struct ScriptedSource {
        calls: AtomicUsize,
        delay: Duration,
        script: std::sync::Mutex<VecDeque<Result<KeySet, FetchError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<KeySet, FetchError>>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Result<KeySet, FetchError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                script: std::sync::Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySetSource for ScriptedSource {
        async fn fetch(&self) -> Result<KeySet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchError::Request("script exhausted".to_string())))
        }
    }

    /// Panics on the first fetch, then serves `key_set`.
    struct PanicOnceSource {
        calls: AtomicUsize,
        key_set: KeySet,
    }

    #[async_trait]
    impl KeySetSource for PanicOnceSource {
        async fn fetch(&self) -> Result<KeySet, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("key set source blew up");
            }
            Ok(self.key_set.clone())
        }
    }

    fn key_set(kids: &[&str]) -> KeySet {
        KeySet::new(
            kids.iter()
                .map(|kid| KeyDescriptor {
                    kty: "RSA".to_string(),
                    kid: (*kid).to_string(),
                    key_use: "sig".to_string(),
                    n: "AQAB".to_string(),
                    e: "AQAB".to_string(),
                })
                .collect(),
        )
    }

    fn cache_with(source: Arc<ScriptedSource>, ttl: Duration) -> KeySetCache {
        KeySetCache::with_settings(source, ttl, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_empty_cache_fetches_once_within_ttl() {
        let source = ScriptedSource::new(vec![Ok(key_set(&["a"]))]);
        let cache = cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL);

        assert_eq!(cache.state().await, CacheState::Empty);

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();

        assert_eq!(source.calls(), 1, "second read must be served from cache");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.state().await, CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let source = ScriptedSource::new(vec![Ok(key_set(&["a"])), Ok(key_set(&["b"]))]);
        let cache = cache_with(Arc::clone(&source), Duration::from_millis(50));

        let first = cache.get(false).await.unwrap();
        assert!(first.find("a").is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.state().await, CacheState::Expired);

        let second = cache.get(false).await.unwrap();
        assert!(second.find("b").is_some());
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.state().await, CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let source = ScriptedSource::new(vec![Ok(key_set(&["a"])), Ok(key_set(&["b"]))]);
        let cache = cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL);

        cache.get(false).await.unwrap();
        let refreshed = cache.get(true).await.unwrap();

        assert_eq!(source.calls(), 2);
        assert!(refreshed.find("b").is_some());
        assert!(cache.get(false).await.unwrap().find("b").is_some());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let source =
            ScriptedSource::with_delay(vec![Ok(key_set(&["a"]))], Duration::from_millis(100));
        let cache = Arc::new(cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(source.calls(), 1, "concurrent callers must coalesce");
        let first = results.first().unwrap();
        assert!(results.iter().all(|set| Arc::ptr_eq(set, first)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_after_expiry_share_one_fetch() {
        let source = ScriptedSource::with_delay(
            vec![Ok(key_set(&["a"])), Ok(key_set(&["b"]))],
            Duration::from_millis(50),
        );
        let cache = Arc::new(cache_with(Arc::clone(&source), Duration::from_millis(100)));

        cache.get(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await })
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            assert!(joined.unwrap().unwrap().find("b").is_some());
        }
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let source = ScriptedSource::with_delay(
            vec![Err(FetchError::Status(500))],
            Duration::from_millis(50),
        );
        let cache = Arc::new(cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await })
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            assert_eq!(joined.unwrap(), Err(FetchError::Status(500)));
        }
        assert_eq!(source.calls(), 1, "a failed fetch is shared, not retried");
    }

    #[tokio::test]
    async fn test_failure_on_empty_cache_stays_empty() {
        let source = ScriptedSource::new(vec![Err(FetchError::Timeout), Ok(key_set(&["a"]))]);
        let cache = cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL);

        assert_eq!(cache.get(false).await, Err(FetchError::Timeout));
        assert_eq!(cache.state().await, CacheState::Empty);

        assert!(cache.get(false).await.unwrap().find("a").is_some());
        assert_eq!(cache.state().await, CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set_but_distrusts_it() {
        let source = ScriptedSource::new(vec![
            Ok(key_set(&["a"])),
            Err(FetchError::Status(502)),
            Ok(key_set(&["b"])),
        ]);
        let cache = cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL);

        cache.get(false).await.unwrap();
        let before = cache.cached().await.unwrap();

        assert_eq!(cache.get(true).await, Err(FetchError::Status(502)));

        let after = cache.cached().await.unwrap();
        assert_eq!(*after.key_set, *before.key_set, "failed refresh must not alter data");
        assert_eq!(after.fetched_at, before.fetched_at);
        assert_eq!(after.expires_at, before.expires_at);
        assert_eq!(cache.state().await, CacheState::Expired);

        // Unexpired but untrusted data forces another fetch
        let next = cache.get(false).await.unwrap();
        assert!(next.find("b").is_some());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_after_expiry_stays_expired() {
        let source =
            ScriptedSource::new(vec![Ok(key_set(&["a"])), Err(FetchError::Decode("bad".into()))]);
        let cache = cache_with(Arc::clone(&source), Duration::from_millis(30));

        cache.get(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(cache.get(false).await, Err(FetchError::Decode(_))));
        assert_eq!(cache.state().await, CacheState::Expired);
        assert!(cache.cached().await.unwrap().key_set.find("a").is_some());
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_a_failure() {
        let source = ScriptedSource::with_delay(vec![Ok(key_set(&["a"]))], Duration::from_secs(5));
        let cache = KeySetCache::with_settings(
            Arc::clone(&source) as Arc<dyn KeySetSource>,
            DEFAULT_KEY_SET_TTL,
            Duration::from_millis(50),
        );

        assert_eq!(cache.get(false).await, Err(FetchError::Timeout));
        assert_eq!(cache.state().await, CacheState::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_fetch() {
        let source =
            ScriptedSource::with_delay(vec![Ok(key_set(&["a"]))], Duration::from_millis(100));
        let cache = Arc::new(cache_with(Arc::clone(&source), DEFAULT_KEY_SET_TTL));

        // First caller gives up long before the fetch completes
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cache.get(false)).await;
        assert!(abandoned.is_err());

        // A second caller joins the same fetch
        let key_set = cache.get(false).await.unwrap();
        assert!(key_set.find("a").is_some());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_source_does_not_wedge_cache() {
        let source = Arc::new(PanicOnceSource {
            calls: AtomicUsize::new(0),
            key_set: key_set(&["a"]),
        });
        let cache = KeySetCache::new(Arc::clone(&source) as Arc<dyn KeySetSource>);

        assert_eq!(cache.get(false).await, Err(FetchError::Aborted));
        assert_eq!(cache.state().await, CacheState::Empty);

        // The next read starts a new fetch instead of joining the dead one
        let key_set = cache.get(false).await.unwrap();
        assert!(key_set.find("a").is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state().await, CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let source = ScriptedSource::new(vec![Ok(key_set(&["a"])), Ok(key_set(&["b"]))]);
        let cache = KeySetCache::with_settings(
            Arc::clone(&source) as Arc<dyn KeySetSource>,
            Duration::from_secs(u64::MAX),
            Duration::from_secs(5),
        );

        assert_eq!(cache.ttl(), MAX_KEY_SET_TTL);
        for _ in 0..3 {
            assert!(cache.get(false).await.unwrap().find("a").is_some());
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.state().await, CacheState::Fresh);
    }

    #[test]
    fn test_unrepresentable_window_is_never_fresh() {
        let now = Instant::now();
        let cached = CachedKeySet::new(Arc::new(KeySet::default()), now, Duration::MAX);

        assert_eq!(cached.expires_at, now);
        assert!(!cached.is_fresh_at(now));
    }

    #[test]
    fn test_cached_key_set_window_is_half_open() {
        let now = Instant::now();
        let cached = CachedKeySet::new(Arc::new(KeySet::default()), now, Duration::from_secs(10));

        assert!(cached.is_fresh_at(now));
        assert!(cached.is_fresh_at(now + Duration::from_secs(9)));
        assert!(!cached.is_fresh_at(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_default_ttl_is_24_hours() {
        assert_eq!(DEFAULT_KEY_SET_TTL, Duration::from_secs(86_400));
    }
}
