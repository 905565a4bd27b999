//! Disk tier for the metadata cache: each entry keeps a body file plus a
//! `.meta` sidecar, so the index can be rebuilt by scanning the directory
//! if `index.json` is lost or corrupt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{atomic_write, remove_if_exists};

const BODY_EXT: &str = "body";
const SIDECAR_EXT: &str = "meta";
const INDEX_FILE: &str = "index.json";

/// Per-entry metadata for the metadata cache: just enough to evaluate
/// freshness and drive LRU, without the image cache's full policy fields
/// (the metadata cache only ever compares against the fixed default TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEntryMeta {
    /// Strong validator, used to build conditional revalidation requests.
    pub etag: Option<String>,
    /// When this entry was created by a successful fetch.
    #[serde(with = "super::iso8601")]
    pub cached_at: SystemTime,
    /// LRU key; mutated on every read or revalidation.
    #[serde(with = "super::iso8601")]
    pub last_accessed_at: SystemTime,
    /// Authoritative byte length of the stored JSON body.
    pub content_length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaIndexEntry {
    key_hash: String,
    #[serde(flatten)]
    meta: MetaEntryMeta,
}

struct State {
    index: HashMap<String, MetaEntryMeta>,
    pending_write: Option<JoinHandle<()>>,
}

/// Key-hash addressable disk storage for the metadata cache.
pub struct MetadataDiskStore {
    root: PathBuf,
    max_disk_bytes: u64,
    default_ttl: Duration,
    index_write_debounce: Duration,
    state: Arc<Mutex<State>>,
    available: bool,
}

impl std::fmt::Debug for MetadataDiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataDiskStore")
            .field("root", &self.root)
            .field("max_disk_bytes", &self.max_disk_bytes)
            .field("default_ttl", &self.default_ttl)
            .field("available", &self.available)
            .finish()
    }
}

impl MetadataDiskStore {
    /// Create the root directory if missing, then rebuild the index: load
    /// `index.json` if it parses, otherwise reconstruct it by scanning for
    /// `.meta` sidecars with a matching `.body` file, discarding orphans.
    pub async fn new(
        root: PathBuf,
        max_disk_bytes: u64,
        default_ttl: Duration,
        index_write_debounce: Duration,
    ) -> Self {
        let available = tokio::fs::create_dir_all(&root).await.is_ok();
        let index = if available {
            match Self::load_index(&root).await {
                Some(index) => index,
                None => Self::rebuild_from_sidecars(&root).await,
            }
        } else {
            log::warn!("metadata disk store root {:?} is unavailable; caching disabled", root);
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

    async fn load_index(root: &PathBuf) -> Option<HashMap<String, MetaEntryMeta>> {
        let bytes = tokio::fs::read(root.join(INDEX_FILE)).await.ok()?;
        let entries: Vec<MetaIndexEntry> = serde_json::from_slice(&bytes).ok()?;
        Some(entries.into_iter().map(|e| (e.key_hash, e.meta)).collect())
    }

    async fn rebuild_from_sidecars(root: &PathBuf) -> HashMap<String, MetaEntryMeta> {
        log::warn!("rebuilding metadata cache index from sidecars under {:?}", root);
        let mut index = HashMap::new();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(_) => return index,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                continue;
            }
            let Some(key_hash) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let body_path = path.with_extension(BODY_EXT);
            if tokio::fs::metadata(&body_path).await.is_err() {
                let _ = remove_if_exists(&path).await;
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<MetaEntryMeta>(&bytes) {
                    Ok(meta) => {
                        index.insert(key_hash.to_string(), meta);
                    }
                    Err(_) => {
                        let _ = remove_if_exists(&path).await;
                        let _ = remove_if_exists(&body_path).await;
                    }
                },
                Err(_) => continue,
            }
        }
        index
    }

    fn body_path(&self, key_hash: &str) -> PathBuf {
        self.root.join(format!("{key_hash}.{BODY_EXT}"))
    }

    fn sidecar_path(&self, key_hash: &str) -> PathBuf {
        self.root.join(format!("{key_hash}.{SIDECAR_EXT}"))
    }

    /// Read a body + its metadata, refreshing `last_accessed_at`.
    pub async fn load(&self, key_hash: &str) -> Option<(Bytes, MetaEntryMeta)> {
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
                self.write_sidecar(key_hash, &meta).await;
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

    /// Identical to [`Self::load`]: the disk store never filters by
    /// freshness on its own; that decision belongs to the facade.
    pub async fn load_stale(&self, key_hash: &str) -> Option<(Bytes, MetaEntryMeta)> {
        self.load(key_hash).await
    }

    /// Write the body and its sidecar atomically, update the index, and
    /// enforce the size limit. Returns the number of entries evicted to stay
    /// under the size limit.
    pub async fn save(&self, key_hash: &str, bytes: &[u8], meta: MetaEntryMeta) -> u64 {
        if !self.available {
            return 0;
        }
        if let Err(e) = atomic_write(&self.body_path(key_hash), bytes).await {
            log::warn!("failed to write metadata body for {key_hash}: {e}");
            return 0;
        }
        self.write_sidecar(key_hash, &meta).await;
        let mut guard = self.state.lock().await;
        guard.index.insert(key_hash.to_string(), meta);
        self.schedule_index_write(&mut guard);
        drop(guard);
        self.enforce_size_limit().await
    }

    async fn write_sidecar(&self, key_hash: &str, meta: &MetaEntryMeta) {
        match serde_json::to_vec_pretty(meta) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(&self.sidecar_path(key_hash), &bytes).await {
                    log::warn!("failed to write sidecar for {key_hash}: {e}");
                }
            }
            Err(e) => log::warn!("failed to serialize sidecar for {key_hash}: {e}"),
        }
    }

    /// Refresh `last_accessed_at` without re-reading the body.
    pub async fn touch(&self, key_hash: &str) {
        if !self.available {
            return;
        }
        let mut guard = self.state.lock().await;
        if let Some(meta) = guard.index.get_mut(key_hash) {
            meta.last_accessed_at = SystemTime::now();
            let meta = meta.clone();
            self.write_sidecar(key_hash, &meta).await;
            self.schedule_index_write(&mut guard);
        }
    }

    /// Delete the body, sidecar, and index entry.
    pub async fn remove(&self, key_hash: &str) {
        if !self.available {
            return;
        }
        let _ = remove_if_exists(&self.body_path(key_hash)).await;
        let _ = remove_if_exists(&self.sidecar_path(key_hash)).await;
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
            let _ = remove_if_exists(&self.sidecar_path(key_hash)).await;
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
            let _ = remove_if_exists(&self.sidecar_path(&key_hash)).await;
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
            let snapshot: Vec<MetaIndexEntry> = {
                let mut guard = shared.lock().await;
                guard.pending_write = None;
                guard
                    .index
                    .iter()
                    .map(|(k, v)| MetaIndexEntry { key_hash: k.clone(), meta: v.clone() })
                    .collect()
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(bytes) => {
                    if let Err(e) = atomic_write(&root.join(INDEX_FILE), &bytes).await {
                        log::warn!("failed to flush metadata cache index: {e}");
                    }
                }
                Err(e) => log::warn!("failed to serialize metadata cache index: {e}"),
            }
        });
        state.pending_write = Some(handle);
    }
}
