//! Disk tier for the image (thumbnail) cache: body-only files plus a
//! consolidated index with metadata inlined.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{atomic_write, remove_if_exists};

const BODY_EXT: &str = "img";
const INDEX_FILE: &str = "index.json";

/// Per-entry metadata stored alongside a cached image body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Strong validator. Empty string is normalized to `None` at parse time.
    pub etag: Option<String>,
    /// Opaque HTTP-date validator.
    pub last_modified: Option<String>,
    /// Instant this entry stops being fresh, from policy or the default TTL.
    #[serde(with = "super::iso8601_opt")]
    pub expires_at: Option<SystemTime>,
    /// True if the policy had `no-cache` or `must-revalidate`.
    pub must_revalidate: bool,
    /// Recorded `Content-Type` of the body.
    pub content_type: String,
    /// Authoritative byte length of the stored body.
    pub content_length: u64,
    /// When this entry was created by a successful fetch.
    #[serde(with = "super::iso8601")]
    pub cached_at: SystemTime,
    /// LRU key; mutated on every read or revalidation.
    #[serde(with = "super::iso8601")]
    pub last_accessed_at: SystemTime,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageIndexEntry {
    key_hash: String,
    metadata: EntryMetadata,
}

struct State {
    index: HashMap<String, EntryMetadata>,
    pending_write: Option<JoinHandle<()>>,
}

/// Key-hash addressable disk storage for the image cache.
///
/// All state mutation is serialized through a single `tokio::sync::Mutex`,
/// playing the role of a single serial disk executor: the in-memory
/// index is never observed mid-update from outside the lock.
pub struct ImageDiskStore {
    root: PathBuf,
    max_disk_bytes: u64,
    default_ttl: Duration,
    index_write_debounce: Duration,
    state: Arc<Mutex<State>>,
    available: bool,
}

impl std::fmt::Debug for ImageDiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDiskStore")
            .field("root", &self.root)
            .field("max_disk_bytes", &self.max_disk_bytes)
            .field("default_ttl", &self.default_ttl)
            .field("available", &self.available)
            .finish()
    }
}

impl ImageDiskStore {
    /// Create the root directory if missing and rebuild the index, either
    /// by loading `index.json` or, on failure, starting empty (the image
    /// cache has no sidecars to scan, unlike the metadata cache).
    pub async fn new(
        root: PathBuf,
        max_disk_bytes: u64,
        default_ttl: Duration,
        index_write_debounce: Duration,
    ) -> Self {
        let available = tokio::fs::create_dir_all(&root).await.is_ok();
        let index = if available {
            Self::load_index(&root).await.unwrap_or_default()
        } else {
            log::warn!("image disk store root {:?} is unavailable; caching disabled", root);
            HashMap::new()
        };
        Self {
            root,
            max_disk_bytes,
            default_ttl,
            index_write_debounce,
            state: Arc::new(Mutex::new(State { index, pending_write: None })),
            available,
        }
    }

    async fn load_index(root: &PathBuf) -> Option<HashMap<String, EntryMetadata>> {
        let bytes = tokio::fs::read(root.join(INDEX_FILE)).await.ok()?;
        let entries: Vec<ImageIndexEntry> = serde_json::from_slice(&bytes).ok()?;
        Some(entries.into_iter().map(|e| (e.key_hash, e.metadata)).collect())
    }

    fn body_path(&self, key_hash: &str) -> PathBuf {
        self.root.join(format!("{key_hash}.{BODY_EXT}"))
    }

    /// Read a body + its metadata, refreshing `last_accessed_at`.
    pub async fn load(&self, key_hash: &str) -> Option<(Bytes, EntryMetadata)> {
        if !self.available {
            return None;
        }
        let mut guard = self.state.lock().await;
        if !guard.index.contains_key(key_hash) {
            return None;
        }
        match tokio::fs::read(self.body_path(key_hash)).await {
            Ok(bytes) => {
                let meta = guard.index.get_mut(key_hash).unwrap();
                meta.last_accessed_at = SystemTime::now();
                let meta = meta.clone();
                self.schedule_index_write(&mut guard);
                Some((Bytes::from(bytes), meta))
            }
            Err(_) => {
                guard.index.remove(key_hash);
                self.schedule_index_write(&mut guard);
                None
            }
        }
    }

    /// Identical to [`Self::load`]: the disk store itself never filters by
    /// freshness, so there is nothing extra to bypass.
    pub async fn load_stale(&self, key_hash: &str) -> Option<(Bytes, EntryMetadata)> {
        self.load(key_hash).await
    }

    /// Write the body atomically, update the index, and enforce the size
    /// limit. Never returns an error to the caller: a body write failure is
    /// logged and leaves the index unchanged. Returns the number of entries
    /// evicted to stay under the size limit.
    pub async fn save(&self, key_hash: &str, bytes: &[u8], metadata: EntryMetadata) -> u64 {
        if !self.available {
            return 0;
        }
        if let Err(e) = atomic_write(&self.body_path(key_hash), bytes).await {
            log::warn!("failed to write image body for {key_hash}: {e}");
            return 0;
        }
        let mut guard = self.state.lock().await;
        guard.index.insert(key_hash.to_string(), metadata);
        self.schedule_index_write(&mut guard);
        drop(guard);
        self.enforce_size_limit().await
    }

    /// Refresh `last_accessed_at` without re-reading the body.
    pub async fn touch(&self, key_hash: &str) {
        if !self.available {
            return;
        }
        let mut guard = self.state.lock().await;
        if let Some(meta) = guard.index.get_mut(key_hash) {
            meta.last_accessed_at = SystemTime::now();
            self.schedule_index_write(&mut guard);
        }
    }

    /// Delete the body and drop the index entry.
    pub async fn remove(&self, key_hash: &str) {
        if !self.available {
            return;
        }
        let _ = remove_if_exists(&self.body_path(key_hash)).await;
        let mut guard = self.state.lock().await;
        guard.index.remove(key_hash);
        self.schedule_index_write(&mut guard);
    }

    /// TTL sweep followed by an LRU sweep down to `max_disk_bytes`. Returns
    /// the number of entries evicted.
    pub async fn evict_expired_and_enforce_lru(&self) -> u64 {
        if !self.available {
            return 0;
        }
        let now = SystemTime::now();
        let mut guard = self.state.lock().await;
        let expired: Vec<String> = guard
            .index
            .iter()
            .filter(|(_, m)| {
                now.duration_since(m.cached_at).unwrap_or_default() > self.default_ttl
            })
            .map(|(k, _)| k.clone())
            .collect();
        let mut evicted = 0u64;
        for key_hash in &expired {
            guard.index.remove(key_hash);
            evicted += 1;
        }
        drop(guard);
        for key_hash in &expired {
            let _ = remove_if_exists(&self.body_path(key_hash)).await;
        }
        evicted += self.lru_sweep().await;
        let mut guard = self.state.lock().await;
        self.schedule_index_write(&mut guard);
        evicted
    }

    async fn enforce_size_limit(&self) -> u64 {
        let evicted = self.lru_sweep().await;
        let mut guard = self.state.lock().await;
        self.schedule_index_write(&mut guard);
        evicted
    }

    /// While total bytes exceed the budget, evict the entry with the
    /// smallest `last_accessed_at`, breaking ties by key-hash order.
    async fn lru_sweep(&self) -> u64 {
        let mut evicted = 0u64;
        loop {
            let victim = {
                let guard = self.state.lock().await;
                let total: u64 = guard.index.values().map(|m| m.content_length).sum();
                if total <= self.max_disk_bytes || guard.index.is_empty() {
                    None
                } else {
                    guard
                        .index
                        .iter()
                        .min_by(|a, b| {
                            a.1.last_accessed_at
                                .cmp(&b.1.last_accessed_at)
                                .then_with(|| a.0.cmp(b.0))
                        })
                        .map(|(k, _)| k.clone())
                }
            };
            let Some(key_hash) = victim else { break };
            self.remove(&key_hash).await;
            evicted += 1;
        }
        evicted
    }

    /// Delete every file under the root and empty the index.
    pub async fn clear(&self) {
        if !self.available {
            return;
        }
        let mut guard = self.state.lock().await;
        let keys: Vec<String> = guard.index.keys().cloned().collect();
        guard.index.clear();
        if let Some(h) = guard.pending_write.take() {
            h.abort();
        }
        drop(guard);
        for key_hash in keys {
            let _ = remove_if_exists(&self.body_path(&key_hash)).await;
        }
        let _ = remove_if_exists(&self.root.join(INDEX_FILE)).await;
    }

    /// Current entry count and total byte size.
    pub async fn stats(&self) -> (usize, u64) {
        let guard = self.state.lock().await;
        let total = guard.index.values().map(|m| m.content_length).sum();
        (guard.index.len(), total)
    }

    fn schedule_index_write(&self, state: &mut State) {
        if let Some(handle) = state.pending_write.take() {
            handle.abort();
        }
        let shared = self.state.clone();
        let root = self.root.clone();
        let debounce = self.index_write_debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let snapshot: Vec<ImageIndexEntry> = {
                let mut guard = shared.lock().await;
                guard.pending_write = None;
                guard
                    .index
                    .iter()
                    .map(|(k, v)| ImageIndexEntry { key_hash: k.clone(), metadata: v.clone() })
                    .collect()
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(bytes) => {
                    if let Err(e) = atomic_write(&root.join(INDEX_FILE), &bytes).await {
                        log::warn!("failed to flush image cache index: {e}");
                    }
                }
                Err(e) => log::warn!("failed to serialize image cache index: {e}"),
            }
        });
        state.pending_write = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content_length: u64, last_accessed_at: SystemTime) -> EntryMetadata {
        EntryMetadata {
            etag: Some("\"v1\"".into()),
            last_modified: None,
            expires_at: None,
            must_revalidate: false,
            content_type: "image/png".into(),
            content_length,
            cached_at: last_accessed_at,
            last_accessed_at,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageDiskStore::new(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await;
        let now = SystemTime::now();
        store.save("abc", b"hello", meta(5, now)).await;
        let (bytes, loaded) = store.load("abc").await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
        assert!(loaded.last_accessed_at >= now);
        assert_eq!(loaded.content_length, 5);
    }

    #[tokio::test]
    async fn missing_body_file_is_removed_from_index_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageDiskStore::new(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await;
        let now = SystemTime::now();
        store.save("abc", b"hello", meta(5, now)).await;
        tokio::fs::remove_file(dir.path().join("abc.img")).await.unwrap();
        assert!(store.load("abc").await.is_none());
        assert_eq!(store.stats().await, (0, 0));
    }

    #[tokio::test]
    async fn lru_eviction_keeps_total_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageDiskStore::new(
            dir.path().to_path_buf(),
            100,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await;
        let base = SystemTime::now();
        let mut total_evicted = 0u64;
        for (i, key) in ["k1", "k2", "k3", "k4"].iter().enumerate() {
            let accessed = base + Duration::from_secs(i as u64);
            total_evicted += store.save(key, &vec![0u8; 40], meta(40, accessed)).await;
        }
        let (entries, total_bytes) = store.stats().await;
        assert!(total_bytes <= 100);
        assert!(entries >= 2);
        assert!(store.load("k1").await.is_none());
        // save() itself must report the evictions it triggers, since the
        // facade's stats counter is driven off this return value rather
        // than a separate explicit sweep.
        assert!(total_evicted >= 2);
    }

    #[tokio::test]
    async fn clear_empties_index_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageDiskStore::new(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await;
        store.save("abc", b"hello", meta(5, SystemTime::now())).await;
        store.clear().await;
        assert_eq!(store.stats().await, (0, 0));
        assert!(store.load("abc").await.is_none());
    }

    #[tokio::test]
    async fn unavailable_store_is_a_silent_no_op() {
        // Point the root at a path that can't be created (a file, not a dir).
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        tokio::fs::write(&blocked, b"not a directory").await.unwrap();
        let root = blocked.join("nested");
        let store = ImageDiskStore::new(
            root,
            u64::MAX,
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .await;
        store.save("abc", b"hello", meta(5, SystemTime::now())).await;
        assert!(store.load("abc").await.is_none());
        assert_eq!(store.stats().await, (0, 0));
    }
}
