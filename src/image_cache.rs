//! The image (thumbnail) cache facade: the richer of the two state machines,
//! honouring the full `Cache-Control`/`Expires`/`ETag`/`Last-Modified` set
//! plus a `image/*` content-type allow-list.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::disk::image_store::{EntryMetadata, ImageDiskStore};
use crate::error::{CacheError, Result};
use crate::fetcher::{CacheRequest, HttpFetcher};
use crate::key::{canonical_key, sha256_hex};
use crate::policy::{conditional_headers, needs_revalidation, CachePolicy};
use crate::stats::{Stats, StatsSnapshot};

type MemoryEntry = (Bytes, EntryMetadata);

/// Coordinates the memory tier, disk tier, and HTTP fetcher for thumbnail
/// images behind a single `load(url)` contract.
pub struct ImageCache {
    config: CacheConfig,
    fetcher: Arc<dyn HttpFetcher>,
    disk: Arc<ImageDiskStore>,
    memory: Mutex<LruCache<String, MemoryEntry>>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("fetcher", &"dyn HttpFetcher")
            .field("stats", &self.stats)
            .finish()
    }
}

impl ImageCache {
    /// Build a facade rooted at `config.root_directory`, rebuilding its disk
    /// index as described by [`ImageDiskStore::new`].
    pub async fn new(config: CacheConfig, fetcher: Arc<dyn HttpFetcher>) -> Self {
        let root: PathBuf = config.root_directory.clone();
        let disk = ImageDiskStore::new(
            root,
            config.max_disk_bytes,
            config.default_ttl,
            config.index_write_debounce,
        )
        .await;
        let capacity = NonZeroUsize::new(config.memory_items_limit)
            .unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            config,
            fetcher,
            disk: Arc::new(disk),
            memory: Mutex::new(LruCache::new(capacity)),
            stats: Arc::new(Stats::default()),
        }
    }

    /// Fetch and cache an image for `url`, returning its body bytes.
    ///
    /// Memory tier → disk tier → conditional revalidation → cold fetch, in
    /// that order; see the module-level docs for the exact state machine.
    pub async fn load(&self, url: &str) -> Result<Bytes> {
        self.stats.record_request();
        let key = canonical_key(url).map_err(|_| CacheError::InvalidResponse)?;
        let now = SystemTime::now();

        if let Some(bytes) = self.check_memory(&key, now).await {
            return Ok(bytes);
        }

        let key_hash = sha256_hex(&key);
        match self.disk.load(&key_hash).await {
            Some((bytes, meta)) => {
                if !needs_revalidation(
                    meta.must_revalidate,
                    meta.expires_at,
                    meta.cached_at,
                    now,
                    self.config.default_ttl,
                ) {
                    self.stats.record_hit();
                    self.memory.lock().await.put(key, (bytes.clone(), meta));
                    Ok(bytes)
                } else {
                    self.revalidate(url, &key, &key_hash, bytes, meta).await
                }
            }
            None => self.cold_fetch(url, &key, &key_hash).await,
        }
    }

    async fn check_memory(&self, key: &str, now: SystemTime) -> Option<Bytes> {
        let mut memory = self.memory.lock().await;
        let (bytes, meta) = memory.get(key)?;
        if !meta.must_revalidate
            && !crate::policy::is_expired(
                meta.expires_at,
                meta.cached_at,
                now,
                self.config.default_ttl,
            )
        {
            self.stats.record_hit();
            Some(bytes.clone())
        } else {
            None
        }
    }

    async fn revalidate(
        &self,
        url: &str,
        key: &str,
        key_hash: &str,
        bytes: Bytes,
        meta: EntryMetadata,
    ) -> Result<Bytes> {
        let headers = conditional_headers(meta.etag.as_deref(), meta.last_modified.as_deref());
        let request = CacheRequest::get(url).with_headers(headers);
        let response = self.fetcher.fetch(request).await.map_err(CacheError::Network)?;
        match response.status {
            304 => {
                self.stats.record_hit();
                self.memory.lock().await.put(key.to_string(), (bytes.clone(), meta));
                self.disk.touch(key_hash).await;
                Ok(bytes)
            }
            200 => self.process_fresh_response(response.headers, response.body, key, key_hash).await,
            other => Err(CacheError::HttpStatus(other)),
        }
    }

    async fn cold_fetch(&self, url: &str, key: &str, key_hash: &str) -> Result<Bytes> {
        let response = self
            .fetcher
            .fetch(CacheRequest::get(url))
            .await
            .map_err(CacheError::Network)?;
        match response.status {
            200 => self.process_fresh_response(response.headers, response.body, key, key_hash).await,
            other => Err(CacheError::HttpStatus(other)),
        }
    }

    async fn process_fresh_response(
        &self,
        headers: http::HeaderMap,
        bytes: Bytes,
        key: &str,
        key_hash: &str,
    ) -> Result<Bytes> {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type.as_deref().is_some_and(|ct| ct.starts_with("image/")) {
            return Err(CacheError::InvalidContentType(content_type));
        }
        let content_type = content_type.unwrap();

        let now = SystemTime::now();
        let policy = CachePolicy::from_headers(&headers, now);
        if policy.no_store {
            // A prior entry for this key may already exist (this response
            // can be a revalidation of a stale hit); no-store means no body
            // file, no sidecar, and no index entry may survive the request.
            self.memory.lock().await.pop(key);
            let disk = self.disk.clone();
            let key_hash = key_hash.to_string();
            tokio::spawn(async move {
                disk.remove(&key_hash).await;
            });
            return Ok(bytes);
        }

        let expires_at = Some(policy.expires_at.unwrap_or(now + self.config.default_ttl));
        let metadata = EntryMetadata {
            etag: policy.etag,
            last_modified: policy.last_modified,
            expires_at,
            must_revalidate: policy.no_cache || policy.must_revalidate,
            content_type,
            content_length: bytes.len() as u64,
            cached_at: now,
            last_accessed_at: now,
        };

        self.memory.lock().await.put(key.to_string(), (bytes.clone(), metadata.clone()));

        let disk = self.disk.clone();
        let key_hash = key_hash.to_string();
        let body = bytes.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let evicted = disk.save(&key_hash, &body, metadata).await;
            if evicted > 0 {
                stats.record_evictions(evicted);
            }
        });

        Ok(bytes)
    }

    /// Best-effort warm of `urls`; individual failures are swallowed.
    pub async fn prefetch(self: &Arc<Self>, urls: Vec<String>) {
        for url in urls {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.load(&url).await {
                    log::debug!("prefetch failed for {url}: {e}");
                }
            });
        }
    }

    /// Empty the memory tier, zero the counters, and clear the disk store.
    /// Runs synchronously if `wait` is true, otherwise fires the disk clear
    /// in the background.
    pub async fn clear(&self, wait: bool) {
        self.memory.lock().await.clear();
        self.stats.reset();
        if wait {
            self.disk.clear().await;
        } else {
            let disk = self.disk.clone();
            tokio::spawn(async move { disk.clear().await });
        }
    }

    /// Snapshot of request/hit/eviction counters plus current tier sizes.
    pub async fn stats(&self) -> StatsSnapshot {
        let memory_entries = self.memory.lock().await.len();
        let (disk_entries, disk_bytes) = self.disk.stats().await;
        self.stats.snapshot(memory_entries, disk_entries, disk_bytes)
    }

    /// Force an immediate disk LRU sweep.
    pub async fn evict_to_limit(&self) {
        let evicted = self.disk.evict_expired_and_enforce_lru().await;
        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
    }
}
