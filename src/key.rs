//! Canonical cache keys and their filesystem-safe hash.

use sha2::{Digest, Sha256};
use url::Url;

/// A single query-string item used to build a canonical key.
///
/// Two `QueryItem` lists that differ only in ordering produce the same
/// canonical key: items are sorted by name, then by value, before being
/// appended to the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryItem {
    /// Query parameter name.
    pub name: String,
    /// Query parameter value. `None` serializes as a bare `k=` with no
    /// value attached.
    pub value: Option<String>,
}

impl QueryItem {
    /// Build a query item from a name/value pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: Some(value.into()) }
    }
}

/// Returns the canonical textual form of `url`, with no query items
/// appended beyond what the URL already carries.
pub fn canonical_key(url: &str) -> Result<String, url::ParseError> {
    let parsed = Url::parse(url)?;
    Ok(parsed.into())
}

/// Returns the canonical key for `url` plus `query_items`, stably sorted by
/// name then value so that reordering the items never changes the key.
pub fn canonical_key_with_query(
    url: &str,
    query_items: &[QueryItem],
) -> Result<String, url::ParseError> {
    let mut base = Url::parse(url)?;
    base.set_query(None);

    let mut sorted: Vec<&QueryItem> = query_items.iter().collect();
    sorted.sort_by(|a, b| {
        a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value))
    });

    if sorted.is_empty() {
        return Ok(base.into());
    }

    let query = sorted
        .iter()
        .map(|item| match &item.value {
            Some(v) => format!("{}={}", item.name, v),
            None => format!("{}=", item.name),
        })
        .collect::<Vec<_>>()
        .join("&");
    base.set_query(Some(&query));
    Ok(base.into())
}

/// Lowercase hex SHA-256 digest of the UTF-8 bytes of `s`.
///
/// Used as the on-disk filename stem (the "key-hash"): pure, stable across
/// processes, and safe to use as a path component regardless of what
/// characters appear in the canonical key.
pub fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_item_reordering_is_stable() {
        let url = "https://api.example.com/v1/items";
        let forward = [QueryItem::new("a", "1"), QueryItem::new("b", "2")];
        let reversed = [QueryItem::new("b", "2"), QueryItem::new("a", "1")];
        assert_eq!(
            canonical_key_with_query(url, &forward).unwrap(),
            canonical_key_with_query(url, &reversed).unwrap(),
        );
    }

    #[test]
    fn equal_name_items_order_by_value() {
        let url = "https://api.example.com/v1/items";
        let a = [QueryItem::new("k", "2"), QueryItem::new("k", "1")];
        let b = [QueryItem::new("k", "1"), QueryItem::new("k", "2")];
        assert_eq!(
            canonical_key_with_query(url, &a).unwrap(),
            canonical_key_with_query(url, &b).unwrap(),
        );
    }

    #[test]
    fn absent_value_emits_bare_key() {
        let url = "https://api.example.com/v1/items";
        let items = [QueryItem { name: "flag".into(), value: None }];
        let key = canonical_key_with_query(url, &items).unwrap();
        assert!(key.ends_with("?flag="));
    }

    #[test]
    fn hash_is_stable_and_lowercase_hex() {
        let key = "https://api.example.com/v1/items?a=1";
        let h1 = sha256_hex(key);
        let h2 = sha256_hex(key);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(canonical_key("not a url").is_err());
    }
}
