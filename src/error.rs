use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for wrapped-client failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef to use with the [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by the wrapped HTTP client.
///
/// The original error is shared behind an [`Arc`] so that the deduplicator
/// can deliver the same failure to every coalesced waiter.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl UpstreamError {
    /// Wraps an error returned by the wrapped client.
    pub fn new(err: BoxError) -> Self {
        Self { inner: Arc::from(err) }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream request failed: {}", self.inner)
    }
}

impl std::error::Error for UpstreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = self.inner.as_ref();
        Some(inner)
    }
}

/// A generic "error" for HTTP caches.
///
/// After construction the façade only ever returns [`Error::Upstream`];
/// every cache-layer failure degrades to a miss or a logged no-op.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The configuration was rejected at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The circuit breaker is open and the backend call was not attempted.
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// A cached blob could not be decoded.
    #[error("cache entry corrupt: {0}")]
    Corruption(String),
    /// The cache backend could not be reached.
    #[error("cache backend unreachable: {0}")]
    BackendUnreachable(String),
    /// A cache backend operation timed out.
    #[error("cache backend operation timed out")]
    BackendTimeout,
    /// There was an error parsing the URL.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
    /// The wrapped HTTP client failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
