//! Freshness classification and TTL derivation.
//!
//! Freshness is derived, never stored: an entry's age is measured against
//! the configured TTL and stale-while-revalidate window on every read.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::CacheConfig;
use crate::HttpResponse;

/// Freshness state of a cached entry at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Age is within the TTL; serve directly.
    Fresh,
    /// Age exceeds the TTL but is within the stale-while-revalidate
    /// window; serve immediately and refresh in the background.
    StaleRevalidatable,
    /// Past both windows; treat as a miss.
    Expired,
}

/// Seconds since the Unix epoch as a float, the wall clock used for
/// `cached_at` stamps and age computation.
#[must_use]
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Age in seconds of an entry stamped at `cached_at`. Clock skew that
/// would produce a negative age reads as zero.
#[must_use]
pub(crate) fn entry_age(cached_at: f64) -> f64 {
    (unix_now() - cached_at).max(0.0)
}

/// Classifies an entry of the given age against the TTL and SWR window.
#[must_use]
pub fn classify(age: f64, ttl_seconds: u64, swr_seconds: u64) -> Freshness {
    let ttl = ttl_seconds as f64;
    if age <= ttl {
        Freshness::Fresh
    } else if swr_seconds > 0 && age <= ttl + swr_seconds as f64 {
        Freshness::StaleRevalidatable
    } else {
        Freshness::Expired
    }
}

/// Whether an entry of the given age may still back serve-stale-on-error.
#[must_use]
pub fn usable_on_error(age: f64, max_stale_age_seconds: u64) -> bool {
    age <= max_stale_age_seconds as f64
}

/// Derives the write TTL from response cache headers.
///
/// `Cache-Control: max-age=N` wins; otherwise `Expires` is parsed as an
/// RFC date. Parsed values are clamped to `[min_ttl, max_ttl]`; missing
/// or unparseable headers fall back to the default TTL unclamped.
#[must_use]
pub fn adaptive_ttl(
    response: &HttpResponse,
    default_ttl: u64,
    min_ttl: u64,
    max_ttl: u64,
) -> u64 {
    if let Some(cache_control) = response.header("cache-control") {
        for directive in cache_control.split(',') {
            if let Some(raw) = directive.trim().strip_prefix("max-age=") {
                if let Ok(ttl) = raw.parse::<u64>() {
                    return ttl.clamp(min_ttl, max_ttl);
                }
            }
        }
    }

    if let Some(expires) = response.header("expires") {
        if let Ok(at) = httpdate::parse_http_date(expires) {
            let ttl = at
                .duration_since(SystemTime::now())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            return ttl.clamp(min_ttl, max_ttl);
        }
    }

    default_ttl
}

/// The cacheability predicate.
///
/// A response is cacheable iff its status is in the configured set (which
/// never includes 4xx/5xx by default), it is not 204 No Content, its
/// content type is absent or textual, and the body fits under the size
/// cap.
#[must_use]
pub fn is_cacheable(response: &HttpResponse, config: &CacheConfig) -> bool {
    if !config.cacheable_status_codes.contains(&response.status) {
        return false;
    }
    if response.status == 204 {
        return false;
    }
    if let Some(content_type) = response.header("content-type") {
        let content_type = content_type.to_ascii_lowercase();
        if !(content_type.starts_with("text/")
            || content_type.starts_with("application/json")
            || content_type.starts_with("application/xhtml"))
        {
            return false;
        }
    }
    response.body.len() <= config.max_bytes
}
