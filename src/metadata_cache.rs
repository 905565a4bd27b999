//! The metadata cache facade: JSON bodies keyed by `(url, query items)`,
//! a fixed default TTL, and a periodic maintenance timer instead of the
//! image cache's fetch-driven eviction.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use std::sync::Mutex as StdMutex;

use crate::config::CacheConfig;
use crate::disk::metadata_store::{MetaEntryMeta, MetadataDiskStore};
use crate::key::{canonical_key_with_query, sha256_hex, QueryItem};
use crate::stats::{Stats, StatsSnapshot};

type MemoryEntry = (Bytes, MetaEntryMeta);

/// Coordinates the memory tier, disk tier, and periodic maintenance for
/// cached JSON metadata responses.
pub struct MetadataCache {
    config: CacheConfig,
    disk: Arc<MetadataDiskStore>,
    memory: Mutex<LruCache<String, MemoryEntry>>,
    stats: Arc<Stats>,
    maintenance: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl MetadataCache {
    /// Build a facade rooted at `config.root_directory`, rebuilding its disk
    /// index as described by [`MetadataDiskStore::new`].
    pub async fn new(config: CacheConfig) -> Self {
        let root: PathBuf = config.root_directory.clone();
        let disk = MetadataDiskStore::new(
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
            disk: Arc::new(disk),
            memory: Mutex::new(LruCache::new(capacity)),
            stats: Arc::new(Stats::default()),
            maintenance: StdMutex::new(None),
        }
    }

    /// Start the periodic `evict-expired-and-enforce-lru` timer. Idempotent
    /// only in the sense that calling it again replaces the prior timer;
    /// callers should call this once per facade instance.
    ///
    /// The timer task holds only a `Weak` reference to this facade, so it
    /// never keeps the facade (and its memory/disk tiers) alive on its own;
    /// it exits on its own the tick after the last `Arc<MetadataCache>` is
    /// dropped, even if the caller never calls [`Self::shutdown`].
    pub fn start_maintenance(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.eviction_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                let evicted = this.disk.evict_expired_and_enforce_lru().await;
                if evicted > 0 {
                    this.stats.record_evictions(evicted);
                }
            }
        });
        if let Some(previous) = self.maintenance.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the periodic maintenance timer, if running.
    pub async fn shutdown(&self) {
        let handle = self.maintenance.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn key(&self, url: &str, query_items: &[QueryItem]) -> Option<String> {
        canonical_key_with_query(url, query_items).ok()
    }

    /// Fresh get: a TTL-gated lookup. Returns `None` on miss or on a hit
    /// past the default TTL (which also evicts the memory entry).
    pub async fn get(&self, url: &str, query_items: &[QueryItem]) -> Option<(Bytes, Option<String>)> {
        self.stats.record_request();
        let key = self.key(url, query_items)?;
        let now = SystemTime::now();

        {
            let mut memory = self.memory.lock().await;
            if let Some((bytes, meta)) = memory.peek(&key).cloned() {
                if now.duration_since(meta.cached_at).unwrap_or_default() > self.config.default_ttl {
                    memory.pop(&key);
                    return None;
                }
                let mut meta = meta;
                meta.last_accessed_at = now;
                memory.put(key, (bytes.clone(), meta.clone()));
                self.stats.record_hit();
                return Some((bytes, meta.etag));
            }
        }

        let key_hash = sha256_hex(&key);
        let (bytes, meta) = self.disk.load(&key_hash).await?;
        if now.duration_since(meta.cached_at).unwrap_or_default() > self.config.default_ttl {
            return None;
        }
        self.stats.record_hit();
        self.promote_to_memory(key, bytes.clone(), meta.clone()).await;
        Some((bytes, meta.etag))
    }

    /// Stale get: bypasses the TTL gate on both tiers. Every return here
    /// (hit or miss) counts as a miss in statistics: a stale return is
    /// degraded service, not a successful cache.
    pub async fn get_stale(
        &self,
        url: &str,
        query_items: &[QueryItem],
    ) -> Option<(Bytes, Option<String>)> {
        self.stats.record_request();
        let key = self.key(url, query_items)?;

        if let Some((bytes, meta)) = self.memory.lock().await.peek(&key).cloned() {
            return Some((bytes, meta.etag));
        }

        let key_hash = sha256_hex(&key);
        let (bytes, meta) = self.disk.load_stale(&key_hash).await?;
        self.promote_to_memory(key, bytes.clone(), meta.clone()).await;
        Some((bytes, meta.etag))
    }

    /// Insert into memory (evicting the least-recently-used entry if the
    /// bound is reached) and asynchronously persist to disk.
    pub async fn store(
        &self,
        url: &str,
        query_items: &[QueryItem],
        body: Bytes,
        etag: Option<String>,
    ) {
        let Some(key) = self.key(url, query_items) else { return };
        let now = SystemTime::now();
        let meta = MetaEntryMeta {
            etag,
            cached_at: now,
            last_accessed_at: now,
            content_length: body.len() as u64,
        };

        self.insert_with_eviction_accounting(key.clone(), body.clone(), meta.clone()).await;

        let disk = self.disk.clone();
        let key_hash = sha256_hex(&key);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let evicted = disk.save(&key_hash, &body, meta).await;
            if evicted > 0 {
                stats.record_evictions(evicted);
            }
        });
    }

    async fn promote_to_memory(&self, key: String, bytes: Bytes, meta: MetaEntryMeta) {
        self.insert_with_eviction_accounting(key, bytes, meta).await;
    }

    async fn insert_with_eviction_accounting(&self, key: String, bytes: Bytes, meta: MetaEntryMeta) {
        let mut memory = self.memory.lock().await;
        if let Some((evicted_key, _)) = memory.push(key.clone(), (bytes, meta)) {
            if evicted_key != key {
                self.stats.record_eviction();
            }
        }
    }

    /// Snapshot of request/hit/eviction counters plus current tier sizes.
    pub async fn stats(&self) -> StatsSnapshot {
        let memory_entries = self.memory.lock().await.len();
        let (disk_entries, disk_bytes) = self.disk.stats().await;
        self.stats.snapshot(memory_entries, disk_entries, disk_bytes)
    }

    /// Empty the memory tier, zero the counters, and clear the disk store.
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

    /// Force an immediate disk LRU sweep.
    pub async fn evict_to_limit(&self) {
        let evicted = self.disk.evict_expired_and_enforce_lru().await;
        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
    }
}
