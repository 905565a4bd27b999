#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Two-tier (memory + disk) HTTP response cache for a desktop media
//! application's metadata and thumbnail traffic.
//!
//! This crate provides two cache facades built on the same four components:
//!
//! - [`key`] — canonical cache keys and their filesystem-safe SHA-256 hash.
//! - [`disk`] — durable, key-hash addressable body + index storage with
//!   startup rebuild and LRU/TTL eviction.
//! - [`policy`] — `Cache-Control`/`Expires`/`ETag`/`Last-Modified` parsing
//!   and freshness/revalidation rules.
//! - [`image_cache`] and [`metadata_cache`] — the two public facades, each
//!   coordinating a memory tier, a disk tier, and (for images) an HTTP
//!   fetcher behind a single request/response contract.
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_cache_core::{CacheConfig, CacheRequest, FetchResponse, HttpFetcher, ImageCache};
//!
//! struct MyFetcher;
//!
//! #[async_trait::async_trait]
//! impl HttpFetcher for MyFetcher {
//!     async fn fetch(
//!         &self,
//!         _request: CacheRequest,
//!     ) -> Result<FetchResponse, media_cache_core::BoxError> {
//!         unimplemented!("issue the real HTTP request here")
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::new("./cache/thumbnails");
//! let cache = ImageCache::new(config, Arc::new(MyFetcher)).await;
//! let _bytes = cache.load("https://example.com/a.jpg").await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod disk;
mod error;
mod fetcher;
mod image_cache;
mod key;
mod metadata_cache;
mod policy;
mod stats;

pub use config::{CacheConfig, CacheRootLayout};
pub use disk::image_store::EntryMetadata;
pub use disk::metadata_store::MetaEntryMeta;
pub use error::{BoxError, CacheError, Result};
pub use fetcher::{CacheRequest, FetchResponse, HttpFetcher};
pub use image_cache::ImageCache;
pub use key::{canonical_key, canonical_key_with_query, sha256_hex, QueryItem};
pub use metadata_cache::MetadataCache;
pub use policy::{conditional_headers, is_expired, needs_revalidation, CachePolicy};
pub use stats::{Stats, StatsSnapshot};
