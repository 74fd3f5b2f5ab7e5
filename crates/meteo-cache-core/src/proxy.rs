//! Cache-aside request handling.
//!
//! ```text
//! request → derive key → cache GET ──hit──→ 200 cached body
//!                           │ miss / store error
//!                           ▼
//!                      upstream GET ──2xx──→ cache SET (ttl) → 200 body
//!                           ├──4xx──→ forwarded verbatim, not cached
//!                           ├──timeout──→ 504
//!                           └──other──→ 500
//! ```
//!
//! Cache failures never fail a request. There is no lock around a key, so
//! concurrent misses for the same key may each fetch and each write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::key::{CacheKey, QueryParams, derive_cache_key};
use crate::metrics;
use crate::outcome::UpstreamOutcome;
use crate::store::{CacheStore, CachedResponse};
use crate::upstream::UpstreamClient;
use crate::DEFAULT_CONTENT_TYPE;

/// A proxy-eligible GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub path: String,
    pub params: QueryParams,
}

impl ProxyRequest {
    pub fn new(path: impl Into<String>, params: QueryParams) -> Self {
        Self {
            path: path.into(),
            params,
        }
    }

    /// Build from a request path and its raw query string, if any.
    pub fn from_path_and_query(path: &str, query: Option<&str>) -> Self {
        Self::new(path, query.map(QueryParams::parse).unwrap_or_default())
    }
}

/// Where the response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache; upstream not contacted.
    Hit,
    /// Not in the cache; served from the upstream.
    Miss,
    /// The cache could not be read; served from the upstream.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

/// Response handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
    pub cache_status: CacheStatus,
}

impl ProxyResponse {
    fn json_error(status: u16, body: serde_json::Value, cache_status: CacheStatus) -> Self {
        Self {
            status,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            body: Bytes::from(body.to_string()),
            cache_status,
        }
    }

    fn gateway_timeout(cache_status: CacheStatus) -> Self {
        Self::json_error(504, json!({ "error": "Gateway timeout" }), cache_status)
    }

    fn internal_error(message: &str, cache_status: CacheStatus) -> Self {
        Self::json_error(
            500,
            json!({ "error": "Internal server error", "message": message }),
            cache_status,
        )
    }
}

/// Cache-aside orchestration over an injected store and upstream client.
#[derive(Clone)]
pub struct CacheAsideProxy {
    cache: Arc<dyn CacheStore>,
    upstream: Arc<dyn UpstreamClient>,
    ttl: Duration,
}

impl CacheAsideProxy {
    pub fn new(cache: Arc<dyn CacheStore>, upstream: Arc<dyn UpstreamClient>, ttl: Duration) -> Self {
        Self {
            cache,
            upstream,
            ttl,
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Answer one request from the cache or the upstream.
    ///
    /// Always produces a response; every failure is mapped to a status here.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub async fn handle(&self, request: &ProxyRequest) -> ProxyResponse {
        let key = derive_cache_key(&request.path, &request.params);

        let cache_status = match self.lookup(&key).await {
            Lookup::Hit(cached) => {
                info!(path = %request.path, key = %key, "cache HIT");
                metrics::record_cache_hit();
                return ProxyResponse {
                    status: 200,
                    content_type: cached
                        .content_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    body: cached.into_body(),
                    cache_status: CacheStatus::Hit,
                };
            }
            Lookup::Miss => CacheStatus::Miss,
            Lookup::Unavailable => CacheStatus::Bypass,
        };
        info!(path = %request.path, key = %key, "cache MISS");
        metrics::record_cache_miss();

        let started = Instant::now();
        let outcome = self.upstream.fetch(&request.path, &request.params).await;
        metrics::record_upstream_request(outcome.label(), started.elapsed());

        match outcome {
            UpstreamOutcome::Success {
                status,
                content_type,
                body,
            } => {
                debug!(upstream_status = status, bytes = body.len(), "upstream success");
                self.store(&key, content_type.clone(), &body).await;
                ProxyResponse {
                    status: 200,
                    content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    body,
                    cache_status,
                }
            }
            UpstreamOutcome::ClientError {
                status,
                content_type,
                body,
            } => {
                warn!(
                    upstream_status = status,
                    body = %String::from_utf8_lossy(&body),
                    "upstream rejected request"
                );
                ProxyResponse {
                    status,
                    content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    body,
                    cache_status,
                }
            }
            UpstreamOutcome::Timeout => {
                warn!("upstream request timed out");
                ProxyResponse::gateway_timeout(cache_status)
            }
            UpstreamOutcome::TransportFailure(message) => {
                error!(error = %message, "upstream request failed");
                ProxyResponse::internal_error(&message, cache_status)
            }
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Lookup {
        let raw = match self.cache.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, falling through to upstream");
                metrics::record_cache_error("get");
                return Lookup::Unavailable;
            }
        };

        match CachedResponse::from_json(&raw) {
            Ok(cached) => Lookup::Hit(cached),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                metrics::record_cache_error("decode");
                Lookup::Miss
            }
        }
    }

    async fn store(&self, key: &CacheKey, content_type: Option<String>, body: &Bytes) {
        let Some(entry) = CachedResponse::from_body(content_type, body) else {
            debug!(key = %key, "body is not UTF-8, not caching");
            return;
        };

        let result = match entry.to_json() {
            Ok(payload) => {
                self.cache
                    .set_with_expiry(key.as_str(), payload, self.ttl)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!(key = %key, ttl_secs = self.ttl.as_secs(), "cache set"),
            Err(e) => {
                warn!(key = %key, error = %e, "cache write failed");
                metrics::record_cache_error("set");
            }
        }
    }
}

enum Lookup {
    Hit(CachedResponse),
    Miss,
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store honouring expiry.
    #[derive(Default)]
    struct MemoryStore {
        entries: DashMap<String, (String, Instant)>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            Ok(self
                .entries
                .get(key)
                .filter(|e| e.1 > Instant::now())
                .map(|e| e.0.clone()))
        }

        async fn set_with_expiry(
            &self,
            key: &str,
            value: String,
            ttl: Duration,
        ) -> Result<(), CacheError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.entries
                .insert(key.to_string(), (value, Instant::now() + ttl));
            Ok(())
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    /// Store whose every operation fails.
    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        fn name(&self) -> &'static str {
            "down"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: String,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::unavailable("connection refused"))
        }
    }

    /// Upstream returning a fixed outcome and recording what it was asked.
    struct FixedUpstream {
        outcome: UpstreamOutcome,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, QueryParams)>>,
    }

    impl FixedUpstream {
        fn new(outcome: UpstreamOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for FixedUpstream {
        async fn fetch(&self, path: &str, params: &QueryParams) -> UpstreamOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((path.to_string(), params.clone()));
            self.outcome.clone()
        }
    }

    const FORECAST_BODY: &str =
        r#"{"latitude":52.1,"longitude":5.1,"hourly":{"temperature_2m":[11.5,11.25]}}"#;

    fn success() -> UpstreamOutcome {
        UpstreamOutcome::Success {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            body: Bytes::from_static(FORECAST_BODY.as_bytes()),
        }
    }

    fn forecast_request(query: &str) -> ProxyRequest {
        ProxyRequest::from_path_and_query("/v1/forecast", Some(query))
    }

    fn proxy(
        store: Arc<dyn CacheStore>,
        upstream: Arc<FixedUpstream>,
        ttl: Duration,
    ) -> CacheAsideProxy {
        CacheAsideProxy::new(store, upstream, ttl)
    }

    #[tokio::test]
    async fn test_cold_miss_then_hit_serves_identical_body() {
        let store = Arc::new(MemoryStore::default());
        let upstream = FixedUpstream::new(success());
        let proxy = proxy(store.clone(), upstream.clone(), Duration::from_secs(3600));

        let first = proxy
            .handle(&forecast_request("latitude=52.1&longitude=5.1"))
            .await;
        assert_eq!(first.status, 200);
        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(first.body, FORECAST_BODY.as_bytes());
        assert_eq!(upstream.calls(), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);

        let second = proxy
            .handle(&forecast_request("latitude=52.1&longitude=5.1"))
            .await;
        assert_eq!(second.status, 200);
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(second.body, first.body);
        assert_eq!(second.content_type, first.content_type);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_reordered_query_is_a_hit() {
        let store = Arc::new(MemoryStore::default());
        let upstream = FixedUpstream::new(success());
        let proxy = proxy(store, upstream.clone(), Duration::from_secs(60));

        proxy
            .handle(&forecast_request("latitude=52.1&longitude=5.1"))
            .await;
        let again = proxy
            .handle(&forecast_request("longitude=5.1&latitude=52.1"))
            .await;

        assert_eq!(again.cache_status, CacheStatus::Hit);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_receives_same_path_and_params() {
        let upstream = FixedUpstream::new(success());
        let proxy = proxy(
            Arc::new(MemoryStore::default()),
            upstream.clone(),
            Duration::from_secs(60),
        );

        proxy
            .handle(&forecast_request("latitude=52.1&hourly=rain&hourly=snowfall"))
            .await;

        let seen = upstream.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/v1/forecast");
        assert_eq!(
            seen[0].1,
            QueryParams::from_pairs([
                ("latitude", "52.1"),
                ("hourly", "rain"),
                ("hourly", "snowfall")
            ])
        );
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = Arc::new(MemoryStore::default());
        let upstream = FixedUpstream::new(success());
        let proxy = proxy(store, upstream.clone(), Duration::from_millis(50));

        proxy.handle(&forecast_request("latitude=1")).await;
        let hit = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(hit.cache_status, CacheStatus::Hit);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let refetched = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(refetched.cache_status, CacheStatus::Miss);
        assert_eq!(refetched.status, 200);
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_cache_degrades_to_upstream() {
        let upstream = FixedUpstream::new(success());
        let proxy = proxy(Arc::new(DownStore), upstream.clone(), Duration::from_secs(60));

        for _ in 0..3 {
            let response = proxy
                .handle(&forecast_request("latitude=52.1&longitude=5.1"))
                .await;
            assert_eq!(response.status, 200);
            assert_eq!(response.cache_status, CacheStatus::Bypass);
            assert_eq!(response.body, FORECAST_BODY.as_bytes());
        }
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_forwarded_and_not_cached() {
        let store = Arc::new(MemoryStore::default());
        let body = r#"{"error":true,"reason":"Cannot initialize WeatherVariable from invalid String value foo"}"#;
        let upstream = FixedUpstream::new(UpstreamOutcome::ClientError {
            status: 400,
            content_type: Some("application/json".into()),
            body: Bytes::from_static(body.as_bytes()),
        });
        let proxy = proxy(store.clone(), upstream.clone(), Duration::from_secs(60));

        let first = proxy.handle(&forecast_request("hourly=foo")).await;
        assert_eq!(first.status, 400);
        assert_eq!(first.body, body.as_bytes());

        let second = proxy.handle(&forecast_request("hourly=foo")).await;
        assert_eq!(second.status, 400);
        assert_eq!(second.cache_status, CacheStatus::Miss);
        assert_eq!(upstream.calls(), 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_keeps_status_and_body() {
        let upstream = FixedUpstream::new(UpstreamOutcome::ClientError {
            status: 404,
            content_type: None,
            body: Bytes::from_static(b"Not Found"),
        });
        let proxy = proxy(
            Arc::new(MemoryStore::default()),
            upstream,
            Duration::from_secs(60),
        );

        let response = proxy
            .handle(&ProxyRequest::from_path_and_query("/v1/nope", None))
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(response.body, "Not Found".as_bytes());
        assert_eq!(response.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let store = Arc::new(MemoryStore::default());
        let proxy = proxy(
            store.clone(),
            FixedUpstream::new(UpstreamOutcome::Timeout),
            Duration::from_secs(60),
        );

        let response = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(response.status, 504);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({ "error": "Gateway timeout" }));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_internal_error_with_message() {
        let proxy = proxy(
            Arc::new(MemoryStore::default()),
            FixedUpstream::new(UpstreamOutcome::TransportFailure(
                "upstream responded with status 502".into(),
            )),
            Duration::from_secs(60),
        );

        let response = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(response.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "upstream responded with status 502");
    }

    #[tokio::test]
    async fn test_success_status_is_normalized_to_ok() {
        let proxy = proxy(
            Arc::new(MemoryStore::default()),
            FixedUpstream::new(UpstreamOutcome::Success {
                status: 203,
                content_type: None,
                body: Bytes::from_static(b"{}"),
            }),
            Duration::from_secs(60),
        );

        let response = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched_and_overwritten() {
        let store = Arc::new(MemoryStore::default());
        let key = derive_cache_key("/v1/forecast", &QueryParams::parse("latitude=1"));
        store
            .set_with_expiry(key.as_str(), "{broken".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let upstream = FixedUpstream::new(success());
        let proxy = proxy(store.clone(), upstream.clone(), Duration::from_secs(60));

        let response = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(response.cache_status, CacheStatus::Miss);
        assert_eq!(response.body, FORECAST_BODY.as_bytes());

        let again = proxy.handle(&forecast_request("latitude=1")).await;
        assert_eq!(again.cache_status, CacheStatus::Hit);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_binary_success_is_passed_through_but_not_cached() {
        let store = Arc::new(MemoryStore::default());
        let upstream = FixedUpstream::new(UpstreamOutcome::Success {
            status: 200,
            content_type: Some("application/octet-stream".into()),
            body: Bytes::from_static(b"\xff\x00\xfe"),
        });
        let proxy = proxy(store.clone(), upstream.clone(), Duration::from_secs(60));

        let response = proxy.handle(&forecast_request("format=xlsx")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, &b"\xff\x00\xfe"[..]);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }
}
