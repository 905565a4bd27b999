//! HTTP cache policy parsing and freshness rules.

use std::time::{Duration, SystemTime};

use http::HeaderMap;

const CACHE_CONTROL: &str = "cache-control";
const EXPIRES: &str = "expires";
const ETAG: &str = "etag";
const LAST_MODIFIED: &str = "last-modified";

/// An immutable view of a response's cache-relevant headers, computed once
/// at the moment the response was observed.
///
/// `max_age` takes precedence over `expires_at` derived from `Expires`, and
/// an empty `ETag` is normalized to `None` at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// `Cache-Control: no-store`.
    pub no_store: bool,
    /// `Cache-Control: no-cache`.
    pub no_cache: bool,
    /// `Cache-Control: must-revalidate`.
    pub must_revalidate: bool,
    /// `Cache-Control: max-age=N`, if present and parseable.
    pub max_age: Option<Duration>,
    /// The instant this entry stops being fresh, derived from `max_age` (if
    /// present) or a parsed `Expires` header, else left unset so the
    /// facade falls back to the configured default TTL.
    pub expires_at: Option<SystemTime>,
    /// Strong validator, verbatim. Empty string is treated as absent.
    pub etag: Option<String>,
    /// Opaque HTTP-date validator, verbatim.
    pub last_modified: Option<String>,
}

impl CachePolicy {
    /// Parse a policy from response headers, using `observed_at` as the
    /// instant the response was received (used to compute `expires_at` from
    /// `max-age`).
    pub fn from_headers(headers: &HeaderMap, observed_at: SystemTime) -> Self {
        let mut no_store = false;
        let mut no_cache = false;
        let mut must_revalidate = false;
        let mut max_age = None;

        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(raw) = value.to_str() else { continue };
            for token in raw.split(',') {
                let token = token.trim();
                let lower = token.to_ascii_lowercase();
                if lower == "no-store" {
                    no_store = true;
                } else if lower == "no-cache" {
                    no_cache = true;
                } else if lower == "must-revalidate" {
                    must_revalidate = true;
                } else if let Some(n) = lower.strip_prefix("max-age=") {
                    if let Ok(secs) = n.trim().parse::<u64>() {
                        max_age = Some(Duration::from_secs(secs));
                    }
                }
            }
        }

        let expires_at = if let Some(age) = max_age {
            Some(observed_at + age)
        } else {
            headers
                .get(EXPIRES)
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| httpdate::parse_http_date(raw).ok())
        };

        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty());

        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self { no_store, no_cache, must_revalidate, max_age, expires_at, etag, last_modified }
    }
}

/// Decide whether an entry with the given policy-derived fields is expired:
/// `expires_at` wins if set, otherwise the configured default TTL measured
/// from `cached_at`.
pub fn is_expired(
    expires_at: Option<SystemTime>,
    cached_at: SystemTime,
    now: SystemTime,
    default_ttl: Duration,
) -> bool {
    match expires_at {
        Some(exp) => now > exp,
        None => now.duration_since(cached_at).unwrap_or_default() > default_ttl,
    }
}

/// An entry needs revalidation iff it is expired or was marked
/// `must-revalidate`/`no-cache` when stored.
pub fn needs_revalidation(
    must_revalidate: bool,
    expires_at: Option<SystemTime>,
    cached_at: SystemTime,
    now: SystemTime,
    default_ttl: Duration,
) -> bool {
    must_revalidate || is_expired(expires_at, cached_at, now, default_ttl)
}

/// Build the conditional-request headers (`If-None-Match`,
/// `If-Modified-Since`) for revalidating an entry with the given
/// validators. Either, both, or neither header may be present.
pub fn conditional_headers(
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = etag {
        if let Ok(value) = http::HeaderValue::from_str(etag) {
            headers.insert("if-none-match", value);
        }
    }
    if let Some(last_modified) = last_modified {
        if let Ok(value) = http::HeaderValue::from_str(last_modified) {
            headers.insert("if-modified-since", value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                http::HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn case_insensitive_directives() {
        let now = SystemTime::now();
        let policy = CachePolicy::from_headers(
            &headers(&[("Cache-Control", "MAX-AGE=60, MUST-REVALIDATE")]),
            now,
        );
        assert_eq!(policy.max_age, Some(Duration::from_secs(60)));
        assert!(policy.must_revalidate);
        assert_eq!(policy.expires_at, Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn max_age_wins_over_expires() {
        let now = SystemTime::now();
        let policy = CachePolicy::from_headers(
            &headers(&[
                ("Cache-Control", "max-age=10"),
                ("Expires", "Sun, 06 Nov 2044 08:49:37 GMT"),
            ]),
            now,
        );
        assert_eq!(policy.expires_at, Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn empty_etag_is_absent() {
        let policy = CachePolicy::from_headers(
            &headers(&[("ETag", "")]),
            SystemTime::now(),
        );
        assert_eq!(policy.etag, None);
    }

    #[test]
    fn max_age_zero_is_born_expired() {
        let now = SystemTime::now();
        let policy = CachePolicy::from_headers(
            &headers(&[("Cache-Control", "max-age=0")]),
            now,
        );
        // expiry is strict `>`, so the entry is only expired once time has
        // actually advanced past the observation instant.
        assert!(is_expired(
            policy.expires_at,
            now,
            now + Duration::from_secs(1),
            Duration::from_secs(3600)
        ));
    }

    #[test]
    fn conditional_headers_include_both_when_present() {
        let headers = conditional_headers(Some("\"v1\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(headers.get("if-none-match").unwrap(), "\"v1\"");
        assert_eq!(
            headers.get("if-modified-since").unwrap(),
            "Mon, 01 Jan 2024 00:00:00 GMT"
        );
    }

    #[test]
    fn default_ttl_applies_without_expires_or_max_age() {
        let now = SystemTime::now();
        let cached_at = now - Duration::from_secs(30);
        assert!(!is_expired(None, cached_at, now, Duration::from_secs(60)));
        assert!(is_expired(None, cached_at, now, Duration::from_secs(10)));
    }
}
