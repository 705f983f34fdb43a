//! Request fingerprinting.
//!
//! A fingerprint is the deterministic cache key for a request: equal
//! fingerprints mean the cached response is interchangeable for the
//! caller under the configured vary rules.

use http::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::CacheConfig;
use crate::CacheRequest;

/// Hex SHA-256 of the given bytes.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Canonical query string: pairs sorted by name, duplicate names kept in
/// their original relative order, so parameter ordering in the URL never
/// changes the key.
fn sorted_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = String::new();
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

fn header_or_empty(request: &CacheRequest, name: &str) -> String {
    request
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Derives the default cache key for a request.
///
/// The key combines the cache version, namespace, method, normalized URL
/// (scheme + host + path), canonical query, body hash, and the optional
/// vary headers. The body is hashed only for POST/PUT/PATCH; absent vary
/// headers contribute empty strings rather than omitted fields.
#[must_use]
pub fn default_fingerprint(request: &CacheRequest, config: &CacheConfig) -> String {
    let url = &request.url;
    let normalized = format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or(""),
        url.path()
    );
    let query = sorted_query(url);

    let has_keyed_body = request.method == Method::POST
        || request.method == Method::PUT
        || request.method == Method::PATCH;
    let body_hash = if has_keyed_body && !request.body.is_empty() {
        sha256_hex(&request.body)
    } else {
        String::new()
    };

    let user_agent = if config.vary_user_agent {
        header_or_empty(request, "user-agent")
    } else {
        String::new()
    };
    let cookie = if config.vary_cookies {
        header_or_empty(request, "cookie")
    } else {
        String::new()
    };

    format!(
        "ver:{}|ns:{}|m:{}|u:{}|q:{}|b:{}|ua:{}|ck:{}",
        config.cache_version,
        config.namespace,
        request.method,
        normalized,
        query,
        body_hash,
        user_agent,
        cookie,
    )
}
