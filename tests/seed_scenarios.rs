//! End-to-end scenarios exercising the public API of both cache facades.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use media_cache_core::{
    BoxError, CacheConfig, CacheError, CacheRequest, FetchResponse, HttpFetcher, ImageCache,
    MetadataCache, QueryItem,
};

struct ScriptedFetcher {
    responses: Vec<FetchResponse>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(responses: Vec<FetchResponse>) -> Self {
        Self { responses, calls: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn fetch(&self, _request: CacheRequest) -> Result<FetchResponse, BoxError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[i.min(self.responses.len() - 1)].clone())
    }
}

struct FailingFetcher;

#[async_trait::async_trait]
impl HttpFetcher for FailingFetcher {
    async fn fetch(&self, _request: CacheRequest) -> Result<FetchResponse, BoxError> {
        Err("connection refused".into())
    }
}

fn headers(pairs: &[(&str, &str)]) -> http::HeaderMap {
    let mut map = http::HeaderMap::new();
    for (k, v) in pairs {
        map.insert(
            http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
            http::HeaderValue::from_str(v).unwrap(),
        );
    }
    map
}

/// Scenario 1: cold hit then 304 revalidation.
#[tokio::test]
async fn cold_hit_then_304_revalidation() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().to_path_buf());
    let fetcher = Arc::new(ScriptedFetcher::new(vec![
        FetchResponse {
            status: 200,
            headers: headers(&[
                ("Content-Type", "image/jpeg"),
                ("ETag", "\"v1\""),
                ("Cache-Control", "max-age=0, must-revalidate"),
            ]),
            body: Bytes::from_static(b"0123456789"),
        },
        FetchResponse { status: 304, headers: http::HeaderMap::new(), body: Bytes::new() },
    ]));
    let cache = ImageCache::new(config, fetcher).await;

    let first = cache.load("https://img.example.com/a.jpg").await.unwrap();
    assert_eq!(first.as_ref(), b"0123456789");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let before = cache.stats().await;
    let second = cache.load("https://img.example.com/a.jpg").await.unwrap();
    assert_eq!(second.as_ref(), b"0123456789");
    let after = cache.stats().await;
    assert_eq!(after.hits, before.hits + 1);
}

/// Scenario 2: `no-store` leaves no persistent state.
#[tokio::test]
async fn no_store_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().to_path_buf());
    let fetcher = Arc::new(ScriptedFetcher::new(vec![FetchResponse {
        status: 200,
        headers: headers(&[("Content-Type", "image/png"), ("Cache-Control", "no-store")]),
        body: Bytes::from_static(b"png-bytes"),
    }]));
    let cache = ImageCache::new(config, fetcher).await;

    let bytes = cache.load("https://img.example.com/b.png").await.unwrap();
    assert_eq!(bytes.as_ref(), b"png-bytes");
    let snap = cache.stats().await;
    assert_eq!(snap.memory_entries, 0);
    assert_eq!(snap.disk_entries, 0);
}

/// Scenario 3: non-image content-type is rejected, no state is created.
#[tokio::test]
async fn non_image_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().to_path_buf());
    let fetcher = Arc::new(ScriptedFetcher::new(vec![FetchResponse {
        status: 200,
        headers: headers(&[("Content-Type", "text/html")]),
        body: Bytes::from_static(b"<html></html>"),
    }]));
    let cache = ImageCache::new(config, fetcher).await;

    let err = cache.load("https://img.example.com/c.jpg").await.unwrap_err();
    match err {
        CacheError::InvalidContentType(Some(ct)) => assert_eq!(ct, "text/html"),
        other => panic!("expected InvalidContentType, got {other:?}"),
    }
    let snap = cache.stats().await;
    assert_eq!(snap.memory_entries, 0);
    assert_eq!(snap.disk_entries, 0);
}

/// Scenario 4: LRU eviction keeps total disk bytes within budget.
#[tokio::test]
async fn lru_eviction_under_byte_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CacheConfig::new(dir.path().to_path_buf());
    config.max_disk_bytes = 100;
    config.index_write_debounce = Duration::from_millis(5);
    let responses = (0..4)
        .map(|_| FetchResponse {
            status: 200,
            headers: headers(&[("Content-Type", "image/jpeg")]),
            body: Bytes::from(vec![0u8; 40]),
        })
        .collect();
    let fetcher = Arc::new(ScriptedFetcher::new(responses));
    let cache = ImageCache::new(config, fetcher).await;

    for n in 1..=4 {
        cache.load(&format!("https://img.example.com/k{n}.jpg")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let snap = cache.stats().await;
    assert!(snap.disk_bytes <= 100, "disk_bytes={}", snap.disk_bytes);
    assert!(snap.disk_entries >= 2, "disk_entries={}", snap.disk_entries);

    // K1 must be the one evicted: it has the oldest last-accessed-at.
    let reload = ImageCache::new(
        CacheConfig { max_disk_bytes: 100, ..CacheConfig::new(dir.path().to_path_buf()) },
        Arc::new(FailingFetcher),
    )
    .await;
    assert!(reload.load("https://img.example.com/k1.jpg").await.is_err());
}

/// Scenario 5: a transport failure while a fresh entry exists still lets
/// `get_stale` surface the previously stored bytes, counting as a miss.
#[tokio::test]
async fn metadata_stale_after_offline() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().to_path_buf());
    let cache = MetadataCache::new(config).await;

    let items = [QueryItem::new("a", "1"), QueryItem::new("b", "2")];
    cache
        .store(
            "https://api.example.com/v1/items",
            &items,
            Bytes::from_static(b"{\"ok\":true}"),
            Some("\"e\"".to_string()),
        )
        .await;

    // Simulated transport failure: the application would call get_stale
    // instead of retrying a fetch through a (here, absent) HTTP fetcher.
    let reordered = [QueryItem::new("b", "2"), QueryItem::new("a", "1")];
    let before = cache.stats().await;
    let (bytes, etag) =
        cache.get_stale("https://api.example.com/v1/items", &reordered).await.unwrap();
    assert_eq!(bytes.as_ref(), b"{\"ok\":true}");
    assert_eq!(etag.as_deref(), Some("\"e\""));
    let after = cache.stats().await;
    assert_eq!(after.hits, before.hits, "stale return must not count as a hit");
}

/// Scenario 6: case-insensitive `Cache-Control` directives.
#[tokio::test]
async fn case_insensitive_cache_control() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().to_path_buf());
    let fetcher = Arc::new(ScriptedFetcher::new(vec![FetchResponse {
        status: 200,
        headers: headers(&[
            ("Content-Type", "image/jpeg"),
            ("Cache-Control", "MAX-AGE=60, MUST-REVALIDATE"),
        ]),
        body: Bytes::from_static(b"jpeg-bytes"),
    }]));
    let cache = ImageCache::new(config, fetcher).await;

    let bytes = cache.load("https://img.example.com/d.jpg").await.unwrap();
    assert_eq!(bytes.as_ref(), b"jpeg-bytes");
    // must-revalidate means a second load (even well within max-age) will
    // not be served straight from memory without hitting the disk tier at
    // minimum; this is observable as the disk entry existing and being
    // consulted rather than a pure in-memory short-circuit.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.stats().await.disk_entries, 1);
}
