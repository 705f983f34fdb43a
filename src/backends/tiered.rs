//! Two-tier cache backend.
//!
//! Reads hit the fast in-process L1 first and fall back to the shared L2,
//! promoting L2 hits into L1 under a short TTL. Writes land in both tiers
//! (L1 with a scaled-down TTL) and broadcast an invalidation so peer L1s
//! drop any stale copy of the key.

use std::sync::Arc;
use std::time::Duration;

use log::warn;

use super::{CacheBackend, DistributedBackend};
use crate::error::Result;
use crate::invalidation::InvalidationCallback;

/// TTL applied to entries promoted from L2 into L1.
const PROMOTION_TTL: Duration = Duration::from_secs(60);

/// Floor for scaled L1 write TTLs, in seconds.
const MIN_L1_TTL_SECS: u64 = 60;

const DEFAULT_L1_TTL_RATIO: f64 = 0.1;

/// L1 + L2 composition with invalidation fan-in.
pub struct TieredBackend {
    l1: Arc<dyn CacheBackend>,
    l2: Arc<dyn CacheBackend>,
    l2_distributed: Option<Arc<dyn DistributedBackend>>,
    l1_ttl_ratio: f64,
}

impl std::fmt::Debug for TieredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredBackend")
            .field("l1_ttl_ratio", &self.l1_ttl_ratio)
            .field("distributed", &self.l2_distributed.is_some())
            .finish_non_exhaustive()
    }
}

impl TieredBackend {
    /// Composes two plain tiers with no cross-process invalidation.
    #[must_use]
    pub fn new(l1: Arc<dyn CacheBackend>, l2: Arc<dyn CacheBackend>) -> Self {
        Self {
            l1,
            l2,
            l2_distributed: None,
            l1_ttl_ratio: DEFAULT_L1_TTL_RATIO,
        }
    }

    /// Composes the tiers over a distributed L2 and subscribes to its
    /// invalidation channel.
    ///
    /// Received patterns drop the matching L1 entries: `*` clears L1, a
    /// plain key deletes that key, and any other glob clears L1
    /// outright. Over-invalidation is safe; pattern matching inside L1
    /// is not required.
    #[must_use]
    pub fn with_distributed_l2<B>(l1: Arc<dyn CacheBackend>, l2: Arc<B>) -> Self
    where
        B: DistributedBackend,
    {
        let l1_for_callback = Arc::clone(&l1);
        let callback: InvalidationCallback = Arc::new(move |pattern: String| {
            let l1 = Arc::clone(&l1_for_callback);
            Box::pin(async move {
                if pattern == "*" || pattern.contains('*') {
                    if let Err(err) = l1.clear().await {
                        warn!("failed to clear L1 on invalidation: {err}");
                    }
                } else if let Err(err) = l1.delete(&pattern).await {
                    warn!("failed to drop {pattern} from L1: {err}");
                }
            })
        });
        l2.start_invalidation_listener(callback);

        let l2_clone: Arc<B> = Arc::clone(&l2);
        let l2_base: Arc<dyn CacheBackend> = l2_clone;
        let l2_distributed: Arc<dyn DistributedBackend> = l2;
        Self {
            l1,
            l2: l2_base,
            l2_distributed: Some(l2_distributed),
            l1_ttl_ratio: DEFAULT_L1_TTL_RATIO,
        }
    }

    /// Overrides the fraction of the write TTL given to L1 entries
    /// (default 0.1, floored at 60 seconds).
    #[must_use]
    pub fn l1_ttl_ratio(mut self, ratio: f64) -> Self {
        self.l1_ttl_ratio = ratio;
        self
    }

    /// Drops every L1 entry.
    pub async fn clear_l1(&self) -> Result<()> {
        self.l1.clear().await
    }

    /// Drops every L2 entry.
    pub async fn clear_l2(&self) -> Result<()> {
        self.l2.clear().await
    }

    fn l1_ttl(&self, ttl: Duration) -> Duration {
        let scaled = (ttl.as_secs() as f64 * self.l1_ttl_ratio).floor() as u64;
        Duration::from_secs(scaled.max(MIN_L1_TTL_SECS))
    }

    async fn publish(&self, pattern: &str) {
        if let Some(distributed) = &self.l2_distributed {
            let _ = distributed.publish_invalidation(pattern).await;
        }
    }
}

#[async_trait::async_trait]
impl CacheBackend for TieredBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.l1.get(key).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(err) => warn!("L1 read failed for {key}: {err}"),
        }

        match self.l2.get(key).await? {
            Some(value) => {
                // Promotion failure must not suppress the L2 hit.
                if let Err(err) =
                    self.l1.set(key, &value, PROMOTION_TTL).await
                {
                    warn!("failed to promote {key} to L1: {err}");
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.l1.set(key, value, self.l1_ttl(ttl)).await?;
        self.l2.set(key, value, ttl).await?;
        // Peers drop their stale L1 copy of this key. The publish also
        // reaches the instance that just wrote; that redundant self-clear
        // is intentional over-invalidation, bounded by TTL.
        self.publish(key).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.l1.delete(key).await?;
        self.l2.delete(key).await?;
        self.publish(key).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.l1.health_check().await && self.l2.health_check().await
    }

    async fn clear(&self) -> Result<()> {
        self.l1.clear().await?;
        self.l2.clear().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use std::sync::Mutex;

    /// Distributed L2 stub that records published patterns and hands the
    /// subscription callback back to the test.
    #[derive(Default)]
    struct StubDistributed {
        inner: MemoryBackend,
        published: Mutex<Vec<String>>,
        callback: Mutex<Option<InvalidationCallback>>,
    }

    impl StubDistributed {
        fn published(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }

        fn callback(&self) -> InvalidationCallback {
            self.callback.lock().unwrap().clone().expect("not subscribed")
        }
    }

    #[async_trait::async_trait]
    impl CacheBackend for StubDistributed {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: &[u8],
            ttl: Duration,
        ) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn health_check(&self) -> bool {
            true
        }
        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    #[async_trait::async_trait]
    impl DistributedBackend for StubDistributed {
        async fn delete_pattern(&self, _pattern: &str) -> Result<()> {
            Ok(())
        }
        async fn publish_invalidation(&self, pattern: &str) -> Result<()> {
            self.published.lock().unwrap().push(pattern.to_string());
            Ok(())
        }
        fn start_invalidation_listener(&self, callback: InvalidationCallback) {
            *self.callback.lock().unwrap() = Some(callback);
        }
        fn stop_invalidation_listener(&self) {
            *self.callback.lock().unwrap() = None;
        }
    }

    fn tiers() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, TieredBackend) {
        let l1 = Arc::new(MemoryBackend::new());
        let l2 = Arc::new(MemoryBackend::new());
        let l1_dyn: Arc<dyn CacheBackend> = &l1.clone();
        let l2_dyn: Arc<dyn CacheBackend> = &l2.clone();
        let tiered = TieredBackend::new(l1_dyn, l2_dyn);
        (l1, l2, tiered)
    }

    #[tokio::test]
    async fn write_lands_in_both_tiers() {
        let (l1, l2, tiered) = tiers();
        tiered.set("k", b"v", Duration::from_secs(600)).await.unwrap();
        assert_eq!(l1.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(l2.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn l2_hit_repopulates_l1() {
        let (l1, l2, tiered) = tiers();
        tiered.set("k", b"v", Duration::from_secs(600)).await.unwrap();
        // Simulate L1 eviction.
        l1.delete("k").await.unwrap();
        assert_eq!(tiered.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(l1.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn miss_in_both_tiers_is_none() {
        let (_, _, tiered) = tiers();
        assert_eq!(tiered.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let (l1, l2, tiered) = tiers();
        tiered.set("k", b"v", Duration::from_secs(600)).await.unwrap();
        tiered.delete("k").await.unwrap();
        assert_eq!(l1.get("k").await.unwrap(), None);
        assert_eq!(l2.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_and_delete_publish_the_key() {
        let l1 = Arc::new(MemoryBackend::new());
        let stub = Arc::new(StubDistributed::default());
        let l1_dyn: Arc<dyn CacheBackend> = &l1.clone();
        let tiered = TieredBackend::with_distributed_l2(l1_dyn, Arc::clone(&stub));
        tiered.set("k", b"v", Duration::from_secs(600)).await.unwrap();
        tiered.delete("k2").await.unwrap();
        assert_eq!(stub.published(), vec!["k".to_string(), "k2".to_string()]);
    }

    #[tokio::test]
    async fn invalidation_messages_drop_l1_entries() {
        let l1 = Arc::new(MemoryBackend::new());
        let stub = Arc::new(StubDistributed::default());
        let l1_dyn: Arc<dyn CacheBackend> = &l1.clone();
        let _tiered = TieredBackend::with_distributed_l2(l1_dyn, Arc::clone(&stub));
        let callback = stub.callback();

        l1.set("a", b"1", Duration::from_secs(600)).await.unwrap();
        l1.set("b", b"2", Duration::from_secs(600)).await.unwrap();

        // A plain key drops exactly that key.
        callback("a".to_string()).await;
        assert_eq!(l1.get("a").await.unwrap(), None);
        assert_eq!(l1.get("b").await.unwrap(), Some(b"2".to_vec()));

        // A glob clears L1 wholesale.
        callback("user:*".to_string()).await;
        assert!(l1.is_empty());

        l1.set("c", b"3", Duration::from_secs(600)).await.unwrap();
        callback("*".to_string()).await;
        assert!(l1.is_empty());
    }

    #[tokio::test]
    async fn promotion_failure_still_returns_value() {
        /// L1 whose writes always fail.
        struct BrokenL1;

        #[async_trait::async_trait]
        impl CacheBackend for BrokenL1 {
            async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }
            async fn set(
                &self,
                _key: &str,
                _value: &[u8],
                _ttl: Duration,
            ) -> Result<()> {
                Err(crate::Error::BackendUnreachable("l1 down".to_string()))
            }
            async fn delete(&self, _key: &str) -> Result<()> {
                Ok(())
            }
            async fn health_check(&self) -> bool {
                false
            }
            async fn clear(&self) -> Result<()> {
                Ok(())
            }
        }

        let l2 = Arc::new(MemoryBackend::new());
        l2.set("k", b"v", Duration::from_secs(600)).await.unwrap();
        let l2_dyn: Arc<dyn CacheBackend> = &l2.clone();
        let tiered = TieredBackend::new(Arc::new(BrokenL1), l2_dyn);
        assert_eq!(tiered.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn health_is_the_and_of_both_tiers() {
        let (_, _, tiered) = tiers();
        assert!(tiered.health_check().await);
    }

    #[tokio::test]
    async fn l1_ttl_is_scaled_and_floored() {
        let (_, _, tiered) = tiers();
        assert_eq!(
            tiered.l1_ttl(Duration::from_secs(6000)),
            Duration::from_secs(600)
        );
        assert_eq!(
            tiered.l1_ttl(Duration::from_secs(100)),
            Duration::from_secs(60)
        );
    }
}
