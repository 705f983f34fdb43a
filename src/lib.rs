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
//! An HTTP response caching layer that wraps an HTTP client.
//!
//! `sgcache` interposes a content-addressed cache between callers and the
//! network: identical requests are answered from cache while fresh,
//! served stale while a background refresh runs, coalesced into a single
//! upstream fetch when they arrive concurrently, and shielded from
//! backend outages by a circuit breaker. Storage is pluggable: an
//! in-process map, Redis, or a tiered composition of both with
//! cross-process invalidation over pub/sub.
//!
//! The wrapped client stays in charge of actual I/O: anything
//! implementing [`RemoteClient`] can sit behind the façade, and upstream
//! failures surface to callers exactly as the wrapped client reported
//! them (unless serve-stale-on-error is enabled and a usable stale entry
//! exists).
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sgcache::{
//!     BoxError, CacheConfig, CacheRequest, CachedClient, HttpResponse,
//!     HttpVersion, MemoryBackend, RemoteClient,
//! };
//!
//! struct MyClient;
//!
//! #[async_trait::async_trait]
//! impl RemoteClient for MyClient {
//!     async fn fetch(
//!         &self,
//!         request: &CacheRequest,
//!     ) -> Result<HttpResponse, BoxError> {
//!         // Drive your real HTTP client here.
//!         Ok(HttpResponse {
//!             status: 200,
//!             url: request.url.clone(),
//!             version: HttpVersion::Http11,
//!             reason: None,
//!             headers: Default::default(),
//!             encoding: None,
//!             body: b"hello".to_vec(),
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let client =
//!         CachedClient::new(MyClient, backend, CacheConfig::default())?;
//!
//!     let first = client.get("https://example.com/").await?;
//!     let second = client.get("https://example.com/").await?; // cache hit
//!     assert_eq!(first.body, second.body);
//!     Ok(())
//! }
//! ```

mod backends;
mod breaker;
mod config;
mod dedup;
mod error;
mod freshness;
mod invalidation;
mod keys;
mod metrics;
mod patterns;
mod serialize;
mod stats;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, Method};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

pub use backends::{
    CacheBackend, DistributedBackend, MemoryBackend, TieredBackend,
};
#[cfg(feature = "backend-redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "backend-redis")))]
pub use backends::RedisBackend;
pub use breaker::{BreakerError, BreakerState, CircuitBreaker};
pub use config::{CacheConfig, Compression, KeyBuilder};
pub use dedup::Deduplicator;
pub use error::{BoxError, Error, Result, UpstreamError};
pub use freshness::{
    adaptive_ttl, classify, is_cacheable, usable_on_error, Freshness,
};
#[cfg(feature = "backend-redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "backend-redis")))]
pub use invalidation::RedisInvalidator;
pub use invalidation::{InvalidationCallback, INVALIDATION_CHANNEL};
pub use keys::default_fingerprint;
pub use metrics::{MetricsSink, NoopMetrics};
pub use patterns::UrlMatcher;
pub use serialize::{deserialize_response, serialize_response};
pub use stats::{CacheStats, StatsSnapshot};

/// Represents an HTTP version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP Version 0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP Version 1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP Version 1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP Version 2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP Version 3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::Http09 => write!(f, "HTTP/0.9"),
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2.0"),
            HttpVersion::H3 => write!(f, "HTTP/3.0"),
        }
    }
}

/// A basic generic type that represents an HTTP response.
///
/// This is the unit the cache stores and replays: status, headers, and
/// the already-decoded body, plus the metadata needed to reconstruct an
/// equivalent response for the caller.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP response status code.
    pub status: u16,
    /// The requested URL.
    pub url: Url,
    /// HTTP version the response arrived over.
    pub version: HttpVersion,
    /// Reason phrase, when the protocol carried one.
    pub reason: Option<String>,
    /// Response headers. Names are conventionally lowercase; lookups via
    /// [`HttpResponse::header`] are case-insensitive either way.
    pub headers: HashMap<String, String>,
    /// Text encoding hint for the body.
    pub encoding: Option<String>,
    /// Decoded body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The body decoded as UTF-8, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An HTTP request as the cache sees it.
///
/// The body is carried eagerly as bytes so the fingerprinter can hash it;
/// requests the wrapped client would stream must be buffered first.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: Url,
    /// Request headers, consulted for the configured vary rules.
    pub headers: HeaderMap,
    /// Request body bytes; empty when the request has no body.
    pub body: Bytes,
}

impl CacheRequest {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Parses the URL and creates a request.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    /// Replaces the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn header(
        mut self,
        name: http::header::HeaderName,
        value: http::header::HeaderValue,
    ) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// The wrapped HTTP client.
///
/// The façade defers all network I/O, including timeouts and
/// cancellation, to this trait; it never retries or rewrites requests.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// Performs the request upstream.
    async fn fetch(
        &self,
        request: &CacheRequest,
    ) -> std::result::Result<HttpResponse, BoxError>;
}

/// Per-call cache behavior overrides.
///
/// `None` fields fall back to [`CacheConfig::cache_by_default`]; the URL
/// policy can still veto both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOverrides {
    /// Whether to attempt a cache read for this call.
    pub cache_read: Option<bool>,
    /// Whether to write the response to cache for this call.
    pub cache_write: Option<bool>,
    /// Skip the cache read and refetch, still writing the result back.
    pub force_refresh: bool,
}

/// The caching façade around a [`RemoteClient`].
///
/// A single instance may be used concurrently from many tasks; clones
/// share the same cache, statistics, deduplicator, and circuit breaker.
pub struct CachedClient<C: RemoteClient> {
    inner: Arc<C>,
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
    matcher: Arc<UrlMatcher>,
    stats: Arc<CacheStats>,
    metrics: Arc<dyn MetricsSink>,
    dedup: Option<Arc<Deduplicator>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl<C: RemoteClient> Clone for CachedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            matcher: Arc::clone(&self.matcher),
            stats: Arc::clone(&self.stats),
            metrics: Arc::clone(&self.metrics),
            dedup: self.dedup.clone(),
            breaker: self.breaker.clone(),
        }
    }
}

impl<C: RemoteClient> fmt::Debug for CachedClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedClient")
            .field("config", &self.config)
            .field("deduplication", &self.dedup.is_some())
            .field("circuit_breaker", &self.breaker.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: RemoteClient> CachedClient<C> {
    /// Wraps `inner` with a cache over `backend`.
    ///
    /// Fails with [`Error::Configuration`] on invalid settings; nothing
    /// is deferred to first use.
    pub fn new(
        inner: C,
        backend: Arc<dyn CacheBackend>,
        config: CacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = UrlMatcher::new(
            &config.cache_patterns,
            &config.exclude_patterns,
        )?;
        let dedup = config.enable_request_deduplication.then(|| {
            Arc::new(Deduplicator::new(Duration::from_secs(
                config.deduplication_timeout_seconds,
            )))
        });
        let breaker = config.enable_circuit_breaker.then(|| {
            Arc::new(CircuitBreaker::new(
                config.circuit_breaker_threshold,
                Duration::from_secs(config.circuit_breaker_timeout),
            ))
        });
        Ok(Self {
            inner: Arc::new(inner),
            backend,
            config: Arc::new(config),
            matcher: Arc::new(matcher),
            stats: Arc::new(CacheStats::new()),
            metrics: Arc::new(NoopMetrics),
            dedup,
            breaker,
        })
    }

    /// Attaches a metrics sink. Defaults to [`NoopMetrics`].
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// A snapshot of the cache statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current circuit breaker state, when one is enabled.
    #[must_use]
    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.breaker.as_ref().map(|breaker| breaker.state())
    }

    /// Performs a GET request.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::GET, url)?).await
    }

    /// Performs a HEAD request.
    pub async fn head(&self, url: &str) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::HEAD, url)?).await
    }

    /// Performs a POST request with the given body.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::POST, url)?.body(body))
            .await
    }

    /// Performs a PUT request with the given body.
    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::PUT, url)?.body(body)).await
    }

    /// Performs a PATCH request with the given body.
    pub async fn patch(
        &self,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::PATCH, url)?.body(body))
            .await
    }

    /// Performs a DELETE request.
    pub async fn delete(&self, url: &str) -> Result<HttpResponse> {
        self.request(CacheRequest::parse(Method::DELETE, url)?).await
    }

    /// Performs a request with the configured cache defaults.
    pub async fn request(&self, request: CacheRequest) -> Result<HttpResponse> {
        self.request_with(request, CacheOverrides::default()).await
    }

    /// Performs a request with per-call cache overrides.
    pub async fn request_with(
        &self,
        request: CacheRequest,
        overrides: CacheOverrides,
    ) -> Result<HttpResponse> {
        let started = Instant::now();

        let mut cache_read =
            overrides.cache_read.unwrap_or(self.config.cache_by_default);
        let mut cache_write =
            overrides.cache_write.unwrap_or(self.config.cache_by_default);
        if !self.matcher.should_cache(request.url.as_str()) {
            cache_read = false;
            cache_write = false;
        }

        let key = self.cache_key(&request);

        if cache_read && !overrides.force_refresh {
            if let Some(blob) = self.backend_get(&key).await {
                match deserialize_response(&blob) {
                    Ok((response, cached_at)) => {
                        let age = freshness::entry_age(cached_at);
                        match classify(
                            age,
                            self.config.ttl_seconds,
                            self.config.stale_while_revalidate_seconds,
                        ) {
                            Freshness::Fresh => {
                                self.stats.increment_hit(blob.len());
                                self.metrics
                                    .record_hit(response.status, blob.len());
                                self.metrics.observe_latency(
                                    "hit",
                                    started.elapsed(),
                                );
                                if self.config.enable_logging {
                                    info!(
                                        "cache hit: {} {} (status={}, age={age:.1}s, namespace={})",
                                        request.method,
                                        request.url,
                                        response.status,
                                        self.config.namespace,
                                    );
                                }
                                return Ok(response);
                            }
                            Freshness::StaleRevalidatable => {
                                self.stats.increment_hit(blob.len());
                                self.metrics
                                    .record_hit(response.status, blob.len());
                                self.metrics.observe_latency(
                                    "hit_stale",
                                    started.elapsed(),
                                );
                                if self.config.enable_logging {
                                    info!(
                                        "stale cache hit: {} {} (status={}, age={age:.1}s, namespace={})",
                                        request.method,
                                        request.url,
                                        response.status,
                                        self.config.namespace,
                                    );
                                }
                                let this = self.clone();
                                let refresh_request = request.clone();
                                let refresh_key = key.clone();
                                tokio::spawn(async move {
                                    this.background_refresh(
                                        refresh_request,
                                        refresh_key,
                                    )
                                    .await;
                                });
                                return Ok(response);
                            }
                            Freshness::Expired => {}
                        }
                    }
                    Err(err) => {
                        self.stats.increment_error();
                        self.metrics.record_error("corruption");
                        warn!(
                            "cache corruption for {} {}: {err}",
                            request.method, request.url
                        );
                        let _ = self.backend.delete(&key).await;
                    }
                }
            }
        }

        self.stats.increment_miss();
        self.metrics.record_miss();
        if self.config.enable_logging {
            debug!("cache miss: {} {}", request.method, request.url);
        }

        let response = match &self.dedup {
            Some(dedup)
                if (cache_read || cache_write)
                    && !overrides.force_refresh =>
            {
                dedup
                    .get_or_fetch(&key, || {
                        self.fetch_upstream(&request, &key)
                    })
                    .await?
            }
            _ => self.fetch_upstream(&request, &key).await?,
        };

        if cache_write && is_cacheable(&response, &self.config) {
            let ttl = self.write_ttl(&response);
            match serialize_response(&response, self.config.compression) {
                Ok(blob) => {
                    match self
                        .backend_set(&key, &blob, Duration::from_secs(ttl))
                        .await
                    {
                        Ok(()) => {
                            self.stats.increment_write(blob.len());
                            self.metrics.record_write();
                            if self.config.enable_logging {
                                debug!(
                                    "cached response: {} {} (status={}, ttl={ttl}s)",
                                    request.method,
                                    request.url,
                                    response.status,
                                );
                            }
                        }
                        Err(err) => {
                            self.stats.increment_error();
                            self.metrics.record_error("write_failed");
                            error!(
                                "failed to cache {} {}: {err}",
                                request.method, request.url
                            );
                        }
                    }
                }
                Err(err) => {
                    self.stats.increment_error();
                    self.metrics.record_error("write_failed");
                    error!(
                        "failed to serialize {} {}: {err}",
                        request.method, request.url
                    );
                }
            }
        } else if cache_write && self.config.enable_logging {
            debug!(
                "response not cacheable: {} {} (status={})",
                request.method, request.url, response.status
            );
        }

        self.metrics.observe_latency("miss", started.elapsed());
        Ok(response)
    }

    /// Preloads the cache by issuing the given requests with bounded
    /// concurrency. Returns a `"METHOD url"` → success map.
    pub async fn warm_cache(
        &self,
        requests: Vec<CacheRequest>,
        concurrency: usize,
    ) -> HashMap<String, bool> {
        futures::stream::iter(requests.into_iter().map(|request| {
            let label = format!("{} {}", request.method, request.url);
            async move {
                let outcome = self.request(request).await.is_ok();
                (label, outcome)
            }
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
    }

    fn cache_key(&self, request: &CacheRequest) -> String {
        match &self.config.key_builder {
            Some(builder) => builder(request, &self.config),
            None => default_fingerprint(request, &self.config),
        }
    }

    fn write_ttl(&self, response: &HttpResponse) -> u64 {
        if self.config.respect_cache_headers {
            adaptive_ttl(
                response,
                self.config.ttl_seconds,
                self.config.min_ttl,
                self.config.max_ttl,
            )
        } else {
            self.config.ttl_seconds
        }
    }

    /// Fetches upstream, falling back to a usable stale entry when
    /// serve-stale-on-error applies.
    async fn fetch_upstream(
        &self,
        request: &CacheRequest,
        key: &str,
    ) -> std::result::Result<HttpResponse, UpstreamError> {
        match self.inner.fetch(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                let err = UpstreamError::new(err);
                if self.config.serve_stale_on_error {
                    // Freshness is deliberately bypassed here; only the
                    // serve-stale age cap applies.
                    if let Ok(Some(blob)) = self.backend.get(key).await {
                        if let Ok((response, cached_at)) =
                            deserialize_response(&blob)
                        {
                            let age = freshness::entry_age(cached_at);
                            if usable_on_error(
                                age,
                                self.config.max_stale_age_seconds,
                            ) {
                                warn!(
                                    "serving stale cache for {} {} after upstream failure: {err}",
                                    request.method, request.url
                                );
                                return Ok(response);
                            }
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Fire-and-forget refresh spawned on stale-revalidatable hits. Runs
    /// after the stale response has been returned; failures only log.
    async fn background_refresh(self, request: CacheRequest, key: String) {
        match self.inner.fetch(&request).await {
            Ok(response) => {
                if !is_cacheable(&response, &self.config) {
                    return;
                }
                let ttl = self.write_ttl(&response);
                match serialize_response(&response, self.config.compression) {
                    Ok(blob) => {
                        if self
                            .backend_set(
                                &key,
                                &blob,
                                Duration::from_secs(ttl),
                            )
                            .await
                            .is_ok()
                            && self.config.enable_logging
                        {
                            info!(
                                "background refresh succeeded: {} {}",
                                request.method, request.url
                            );
                        }
                    }
                    Err(err) => {
                        error!(
                            "background refresh failed to serialize {} {}: {err}",
                            request.method, request.url
                        );
                    }
                }
            }
            Err(err) => {
                if self.config.enable_logging {
                    error!(
                        "background refresh failed for {} {}: {err}",
                        request.method, request.url
                    );
                }
            }
        }
    }

    /// Backend read through the circuit breaker. Failures and open
    /// circuits both read as a miss; neither ever surfaces to the caller.
    async fn backend_get(&self, key: &str) -> Option<Vec<u8>> {
        match &self.breaker {
            Some(breaker) => {
                match breaker.call(|| self.backend.get(key)).await {
                    Ok(value) => value,
                    Err(BreakerError::Open { .. }) => {
                        warn!("circuit breaker is open, skipping cache read");
                        None
                    }
                    Err(BreakerError::Inner(err)) => {
                        self.stats.increment_error();
                        self.metrics.record_error("read_failed");
                        error!("cache read failed: {err}");
                        None
                    }
                }
            }
            None => match self.backend.get(key).await {
                Ok(value) => value,
                Err(err) => {
                    self.stats.increment_error();
                    self.metrics.record_error("read_failed");
                    error!("cache read failed: {err}");
                    None
                }
            },
        }
    }

    /// Backend write through the circuit breaker. An open circuit skips
    /// the write silently; real failures bubble up to be counted.
    async fn backend_set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        match &self.breaker {
            Some(breaker) => {
                match breaker.call(|| self.backend.set(key, value, ttl)).await
                {
                    Ok(()) => Ok(()),
                    Err(BreakerError::Open { .. }) => {
                        warn!(
                            "circuit breaker is open, skipping cache write"
                        );
                        Ok(())
                    }
                    Err(BreakerError::Inner(err)) => Err(err),
                }
            }
            None => self.backend.set(key, value, ttl).await,
        }
    }
}
