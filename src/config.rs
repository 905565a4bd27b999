//! Frozen configuration for a cache facade.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a single cache facade instance, read once at
/// construction and never mutated afterward.
///
/// There is one `CacheConfig` per facade instance (metadata, image) rather
/// than a single process-wide singleton — the facade is constructed with
/// explicit dependencies and the application composes instances as it sees
/// fit.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fallback freshness window when a response carries neither `max-age`
    /// nor `Expires`.
    pub default_ttl: Duration,
    /// Hard upper bound on disk bytes; exceeded triggers LRU eviction.
    pub max_disk_bytes: u64,
    /// Soft upper bound on memory-tier entry count.
    pub memory_items_limit: usize,
    /// Filesystem root for this cache's body/sidecar/index files.
    pub root_directory: PathBuf,
    /// Idle window before a debounced index flush runs.
    pub index_write_debounce: Duration,
    /// Period of the metadata cache's maintenance timer (unused by the
    /// image cache, whose eviction is implicit in `save`).
    pub eviction_interval: Duration,
}

impl CacheConfig {
    /// Build a config rooted at `root_directory` with every other field set
    /// to its documented default.
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self { root_directory: root_directory.into(), ..Self::default() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 3600),
            max_disk_bytes: 256 * 1024 * 1024,
            memory_items_limit: 200,
            root_directory: PathBuf::from("./cache"),
            index_write_debounce: Duration::from_secs(1),
            eviction_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Names the three path components an application picks to lay out both
/// caches under one shared root: a top-level directory name plus one
/// subdirectory per cache family.
///
/// This is the piece of configuration that exists above a single
/// [`CacheConfig`] — it is consumed once, at startup, to derive the
/// `root_directory` each facade's `CacheConfig` gets constructed with.
#[derive(Debug, Clone)]
pub struct CacheRootLayout {
    /// Top-level directory name under which both caches live.
    pub cache_root_dir_name: String,
    /// Subdirectory of `cache_root_dir_name` used for thumbnail images.
    pub thumbnail_subdir: String,
    /// Subdirectory of `cache_root_dir_name` used for metadata entries.
    pub metadata_subdir: String,
}

impl CacheRootLayout {
    /// Root directory for the image cache: `<parent>/<cache_root_dir_name>/<thumbnail_subdir>`.
    pub fn image_root(&self, parent: impl Into<PathBuf>) -> PathBuf {
        parent.into().join(&self.cache_root_dir_name).join(&self.thumbnail_subdir)
    }

    /// Root directory for the metadata cache: `<parent>/<cache_root_dir_name>/<metadata_subdir>`.
    pub fn metadata_root(&self, parent: impl Into<PathBuf>) -> PathBuf {
        parent.into().join(&self.cache_root_dir_name).join(&self.metadata_subdir)
    }
}

impl Default for CacheRootLayout {
    fn default() -> Self {
        Self {
            cache_root_dir_name: "media-cache".to_string(),
            thumbnail_subdir: "thumbnails".to_string(),
            metadata_subdir: "metadata".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_composes_distinct_roots_under_a_shared_parent() {
        let layout = CacheRootLayout::default();
        let image = layout.image_root("/var/lib/app");
        let metadata = layout.metadata_root("/var/lib/app");
        assert_eq!(image, PathBuf::from("/var/lib/app/media-cache/thumbnails"));
        assert_eq!(metadata, PathBuf::from("/var/lib/app/media-cache/metadata"));
        assert_ne!(image, metadata);
    }
}
