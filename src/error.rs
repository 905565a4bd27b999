//! The closed error surface returned to callers.

use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A boxed, type-erased error, used to carry an opaque transport failure
/// without this crate depending on any particular HTTP client's error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The failure kinds a cache facade can return from `load`/`get`/`store`.
///
/// This set is intentionally closed: callers match on it rather than
/// treating the cache as a free-form error source.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The terminal fetch (cold or revalidation) returned a status other
    /// than 200 or 304.
    #[error("upstream returned unexpected status {0}")]
    HttpStatus(u16),
    /// The response body was rejected by the content-type allow-list.
    /// Only raised by the image cache.
    #[error("response content-type was not image/* (got {0:?})")]
    InvalidContentType(Option<String>),
    /// The fetcher returned something that doesn't look like an HTTP
    /// response (e.g. a missing status code).
    #[error("fetcher returned an invalid response shape")]
    InvalidResponse,
    /// The HTTP fetcher failed before a response was observed.
    #[error("network error: {0}")]
    Network(#[source] BoxError),
}
