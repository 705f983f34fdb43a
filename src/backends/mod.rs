//! Cache storage backends.
//!
//! A backend stores opaque byte blobs under string keys with a TTL. The
//! base capability set is [`CacheBackend`]; backends shared between
//! processes additionally implement [`DistributedBackend`], which adds
//! pattern deletion and invalidation fan-out. The tiered backend picks
//! up L2 capabilities at construction.

mod memory;
#[cfg(feature = "backend-redis")]
mod redis;
mod tiered;

pub use memory::MemoryBackend;
#[cfg(feature = "backend-redis")]
pub use redis::RedisBackend;
pub use tiered::TieredBackend;

use std::time::Duration;

use crate::error::Result;
use crate::invalidation::InvalidationCallback;

/// Uniform byte-blob storage with per-entry TTL.
///
/// Backends must be safe for concurrent use by the façade. Expiry is
/// inspected by the façade, not the backend: `get` returns stored bytes
/// whether or not they have expired, which is what makes
/// stale-while-revalidate and serve-stale-on-error possible.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Retrieves the stored bytes for a key. A miss is `Ok(None)`, never
    /// an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores bytes under a key with a future expiry, silently
    /// overwriting any previous entry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Removes a key. Idempotent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Best-effort reachability probe.
    async fn health_check(&self) -> bool;

    /// Drops every entry this backend holds.
    async fn clear(&self) -> Result<()>;
}

/// Extra capabilities of backends shared between processes.
#[async_trait::async_trait]
pub trait DistributedBackend: CacheBackend {
    /// Deletes all keys matching a glob pattern.
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    /// Broadcasts an invalidation pattern to peer instances.
    async fn publish_invalidation(&self, pattern: &str) -> Result<()>;

    /// Starts delivering received invalidation patterns to `callback` on
    /// a background task. Idempotent while a listener is running.
    fn start_invalidation_listener(&self, callback: InvalidationCallback);

    /// Stops the invalidation listener. Idempotent.
    fn stop_invalidation_listener(&self);
}
