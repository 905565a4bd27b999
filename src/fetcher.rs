//! The abstract HTTP transport capability the core depends on.

use bytes::Bytes;
use http::HeaderMap;

use crate::error::BoxError;

/// A request to issue through an [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// The absolute URL being requested.
    pub url: String,
    /// Request headers, including any conditional headers built by
    /// [`crate::policy::conditional_headers`].
    pub headers: HeaderMap,
}

impl CacheRequest {
    /// An unconditional GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), headers: HeaderMap::new() }
    }

    /// Attach additional headers (e.g. conditional validators) to this
    /// request, replacing any existing values for the same header name.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

/// The minimal response shape the core needs: a status code, case
/// insensitive headers, and a body. `http::HeaderMap` already provides
/// case-insensitive lookup, so the policy engine never has to reason about
/// header casing.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code of the response.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, unmodified.
    pub body: Bytes,
}

/// An abstract HTTP transport. The core never talks to a concrete HTTP
/// client directly; it is handed one of these by the application, the same
/// way `http-cache`'s `CacheManager` and `Middleware` traits decouple the
/// cache core from any particular client or manager backend.
#[async_trait::async_trait]
pub trait HttpFetcher: Send + Sync + 'static {
    /// Issue `request` and return the response, or an opaque transport
    /// error. Implementations should not retry internally; retry policy is
    /// an application concern.
    async fn fetch(
        &self,
        request: CacheRequest,
    ) -> std::result::Result<FetchResponse, BoxError>;
}
