use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::CacheRequest;

/// A closure that replaces the built-in fingerprinter.
///
/// Receives the request and the active configuration and returns the cache
/// key. By default the key is derived from the cache version, namespace,
/// method, normalized URL, sorted query, body hash, and the configured
/// vary headers; see [`crate::keys::default_fingerprint`].
pub type KeyBuilder =
    Arc<dyn Fn(&CacheRequest, &CacheConfig) -> String + Send + Sync>;

/// Compression codec applied to cached response bodies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// DEFLATE with a gzip envelope, the default codec.
    #[default]
    Gzip,
    /// LZ4 frame compression.
    Lz4,
    /// Zstandard compression.
    Zstd,
    /// Store the body uncompressed.
    None,
}

impl Compression {
    /// The short tag stored inside serialized blobs.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
            Self::None => "none",
        }
    }

    /// Resolves the codec recorded in a blob.
    ///
    /// Entries written before the tag existed carry no tag and are gzip;
    /// unknown tags also decode as gzip rather than failing the read.
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        tag.and_then(|t| t.parse().ok()).unwrap_or(Self::Gzip)
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(Self::Gzip),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            "none" => Ok(Self::None),
            other => Err(Error::Configuration(format!(
                "invalid compression '{other}', valid options: gzip, lz4, zstd, none"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Configuration for [`crate::CachedClient`].
///
/// Invalid combinations are rejected by [`CacheConfig::validate`], which
/// runs at façade construction, never at first use.
#[derive(Clone)]
pub struct CacheConfig {
    /// Key prefix; also labels metrics.
    pub namespace: String,
    /// Default write TTL in seconds.
    pub ttl_seconds: u64,
    /// Cacheability size cap in bytes.
    pub max_bytes: usize,
    /// Include the `user-agent` header in the fingerprint.
    pub vary_user_agent: bool,
    /// Include the `cookie` header in the fingerprint.
    pub vary_cookies: bool,
    /// Emit per-request log events (hits, misses, writes).
    pub enable_logging: bool,
    /// Default for cache reads and writes when not overridden per call.
    pub cache_by_default: bool,
    /// Participates in the fingerprint; bumping it invalidates old entries.
    pub cache_version: String,
    /// URL glob patterns to include. Empty means include all.
    pub cache_patterns: Vec<String>,
    /// URL glob patterns to exclude. Excludes win over includes.
    pub exclude_patterns: Vec<String>,
    /// Coalesce concurrent identical requests into a single upstream fetch.
    pub enable_request_deduplication: bool,
    /// Maximum time a coalesced waiter blocks on the in-flight fetch.
    pub deduplication_timeout_seconds: u64,
    /// Window after TTL expiry during which stale entries are served while
    /// a background refresh runs. Zero disables stale-while-revalidate.
    pub stale_while_revalidate_seconds: u64,
    /// Serve a stale entry when the upstream fetch fails.
    pub serve_stale_on_error: bool,
    /// Maximum entry age usable by serve-stale-on-error, in seconds.
    pub max_stale_age_seconds: u64,
    /// Derive the write TTL from `Cache-Control` / `Expires` headers.
    pub respect_cache_headers: bool,
    /// Lower clamp for header-derived TTLs, in seconds.
    pub min_ttl: u64,
    /// Upper clamp for header-derived TTLs, in seconds.
    pub max_ttl: u64,
    /// Wrap backend I/O in a circuit breaker.
    pub enable_circuit_breaker: bool,
    /// Consecutive failures before the breaker opens.
    pub circuit_breaker_threshold: u32,
    /// Seconds the breaker stays open before probing recovery.
    pub circuit_breaker_timeout: u64,
    /// Optional replacement for the built-in fingerprinter.
    pub key_builder: Option<KeyBuilder>,
    /// Compression codec for stored bodies.
    pub compression: Compression,
    /// Status codes eligible for caching. 4xx/5xx are never in the default
    /// set, so error responses are never cached unless opted into.
    pub cacheable_status_codes: HashSet<u16>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            ttl_seconds: 86_400,
            max_bytes: 2 * 1024 * 1024,
            vary_user_agent: false,
            vary_cookies: false,
            enable_logging: false,
            cache_by_default: true,
            cache_version: "v1".to_string(),
            cache_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            enable_request_deduplication: true,
            deduplication_timeout_seconds: 10,
            stale_while_revalidate_seconds: 0,
            serve_stale_on_error: false,
            max_stale_age_seconds: 86_400,
            respect_cache_headers: false,
            min_ttl: 60,
            max_ttl: 86_400 * 7,
            enable_circuit_breaker: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: 30,
            key_builder: None,
            compression: Compression::Gzip,
            cacheable_status_codes: (200..300).collect(),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("namespace", &self.namespace)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_bytes", &self.max_bytes)
            .field("vary_user_agent", &self.vary_user_agent)
            .field("vary_cookies", &self.vary_cookies)
            .field("enable_logging", &self.enable_logging)
            .field("cache_by_default", &self.cache_by_default)
            .field("cache_version", &self.cache_version)
            .field("cache_patterns", &self.cache_patterns)
            .field("exclude_patterns", &self.exclude_patterns)
            .field(
                "enable_request_deduplication",
                &self.enable_request_deduplication,
            )
            .field(
                "deduplication_timeout_seconds",
                &self.deduplication_timeout_seconds,
            )
            .field(
                "stale_while_revalidate_seconds",
                &self.stale_while_revalidate_seconds,
            )
            .field("serve_stale_on_error", &self.serve_stale_on_error)
            .field("max_stale_age_seconds", &self.max_stale_age_seconds)
            .field("respect_cache_headers", &self.respect_cache_headers)
            .field("min_ttl", &self.min_ttl)
            .field("max_ttl", &self.max_ttl)
            .field("enable_circuit_breaker", &self.enable_circuit_breaker)
            .field(
                "circuit_breaker_threshold",
                &self.circuit_breaker_threshold,
            )
            .field("circuit_breaker_timeout", &self.circuit_breaker_timeout)
            .field(
                "key_builder",
                &self
                    .key_builder
                    .as_ref()
                    .map(|_| "Fn(&CacheRequest, &CacheConfig) -> String"),
            )
            .field("compression", &self.compression)
            .field("cacheable_status_codes", &self.cacheable_status_codes)
            .finish()
    }
}

impl CacheConfig {
    /// Builds a configuration from `SGCACHE_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Recognized variables: `SGCACHE_NAMESPACE`, `SGCACHE_TTL`,
    /// `SGCACHE_MAX_BYTES`, `SGCACHE_VARY_UA`, `SGCACHE_VARY_COOKIES`,
    /// `SGCACHE_LOGGING`, `SGCACHE_BY_DEFAULT`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(ns) = env::var("SGCACHE_NAMESPACE") {
            config.namespace = ns;
        }
        if let Some(ttl) = env_u64("SGCACHE_TTL")? {
            config.ttl_seconds = ttl;
        }
        if let Some(max_bytes) = env_u64("SGCACHE_MAX_BYTES")? {
            config.max_bytes = usize::try_from(max_bytes).map_err(|_| {
                Error::Configuration(
                    "SGCACHE_MAX_BYTES exceeds the addressable size".to_string(),
                )
            })?;
        }
        if let Some(v) = env_bool("SGCACHE_VARY_UA") {
            config.vary_user_agent = v;
        }
        if let Some(v) = env_bool("SGCACHE_VARY_COOKIES") {
            config.vary_cookies = v;
        }
        if let Some(v) = env_bool("SGCACHE_LOGGING") {
            config.enable_logging = v;
        }
        if let Some(v) = env_bool("SGCACHE_BY_DEFAULT") {
            config.cache_by_default = v;
        }
        Ok(config)
    }

    /// Checks the configuration for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.min_ttl > self.max_ttl {
            return Err(Error::Configuration(format!(
                "min_ttl ({}) cannot be greater than max_ttl ({})",
                self.min_ttl, self.max_ttl
            )));
        }
        if self.circuit_breaker_threshold < 1 {
            return Err(Error::Configuration(
                "circuit_breaker_threshold must be >= 1".to_string(),
            ));
        }
        if self.deduplication_timeout_seconds < 1 {
            return Err(Error::Configuration(
                "deduplication_timeout_seconds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v.to_ascii_lowercase() == "true")
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            Error::Configuration(format!("{name} must be an integer, got '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.cacheable_status_codes.contains(&200));
        assert!(config.cacheable_status_codes.contains(&299));
        assert!(!config.cacheable_status_codes.contains(&404));
        assert!(!config.cacheable_status_codes.contains(&500));
    }

    #[test]
    fn rejects_inverted_ttl_clamp() {
        let config = CacheConfig {
            min_ttl: 600,
            max_ttl: 60,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_zero_breaker_threshold() {
        let config = CacheConfig {
            circuit_breaker_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_dedup_timeout() {
        let config = CacheConfig {
            deduplication_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn compression_parses_known_tags() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("lz4".parse::<Compression>().unwrap(), Compression::Lz4);
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("brotli".parse::<Compression>().is_err());
    }

    #[test]
    fn unknown_blob_tag_falls_back_to_gzip() {
        assert_eq!(Compression::from_tag(None), Compression::Gzip);
        assert_eq!(Compression::from_tag(Some("snappy")), Compression::Gzip);
        assert_eq!(Compression::from_tag(Some("zstd")), Compression::Zstd);
    }
}
