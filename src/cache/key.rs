//! Canonical cache keys.
//!
//! A cache key is always `(auth_scope, canonical_url)`; method is implicitly
//! GET (the only method the cache ever stores). Canonicalisation sorts query
//! parameters and drops the fragment so `?b=2&a=1#x` and `?a=1&b=2` collide.

use url::Url;

/// Canonicalise a URL the way the cache keys expect: scheme, host, and path
/// untouched; query parameters sorted by name; fragment stripped.
pub fn canonicalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw)?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> =
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding_encode(&k), urlencoding_encode(&v)))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    Ok(url.to_string())
}

/// Minimal percent-encoding for query components; `url`'s `query_pairs_mut`
/// already does this on write, but we rebuild the query string by hand here
/// since we need it sorted rather than appended in encounter order.
fn urlencoding_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// A fully-qualified cache key: auth scope plus canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub auth_scope: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(auth_scope: impl Into<String>, raw_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self { auth_scope: auth_scope.into(), url: canonicalize_url(raw_url)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_query_parameters() {
        let a = canonicalize_url("https://api.example.com/items?b=2&a=1").unwrap();
        let b = canonicalize_url("https://api.example.com/items?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn strips_fragment() {
        let a = canonicalize_url("https://api.example.com/items#section").unwrap();
        assert!(!a.contains('#'));
    }

    #[test]
    fn distinct_paths_produce_distinct_keys() {
        let a = CacheKey::new("tenant-1", "https://api.example.com/a").unwrap();
        let b = CacheKey::new("tenant-1", "https://api.example.com/b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn same_url_different_scope_is_distinct() {
        let a = CacheKey::new("tenant-1", "https://api.example.com/a").unwrap();
        let b = CacheKey::new("tenant-2", "https://api.example.com/a").unwrap();
        assert_ne!(a, b);
    }
}
