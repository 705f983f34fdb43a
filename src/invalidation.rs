//! Distributed cache invalidation over pub/sub.
//!
//! When one instance invalidates a key or pattern it publishes the
//! pattern on a well-known channel; peer instances drop the affected
//! entries from their local L1 tiers. Delivery is best effort, with TTL
//! as the correctness backstop, so publish failures are logged and
//! swallowed.

use std::sync::Arc;

use futures::future::BoxFuture;

/// The pub/sub channel carrying invalidation patterns.
pub const INVALIDATION_CHANNEL: &str = "sgcache:invalidate";

/// Handler invoked for each received invalidation pattern.
///
/// The listener task awaits the returned future before taking the next
/// message, so patterns are processed serially in arrival order.
pub type InvalidationCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[cfg(feature = "backend-redis")]
pub use self::redis_invalidator::RedisInvalidator;

#[cfg(feature = "backend-redis")]
mod redis_invalidator {
    use std::sync::Mutex;

    use futures::StreamExt;
    use log::{debug, error, info, warn};
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use tokio::task::JoinHandle;

    use super::{InvalidationCallback, INVALIDATION_CHANNEL};

    /// Publishes and listens for invalidation patterns on Redis pub/sub.
    pub struct RedisInvalidator {
        client: redis::Client,
        conn: ConnectionManager,
        listener: Mutex<Option<JoinHandle<()>>>,
    }

    impl std::fmt::Debug for RedisInvalidator {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisInvalidator").finish_non_exhaustive()
        }
    }

    impl RedisInvalidator {
        /// Creates an invalidator over an existing client and connection.
        #[must_use]
        pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
            Self {
                client,
                conn,
                listener: Mutex::new(None),
            }
        }

        /// Publishes an invalidation pattern to peer instances.
        ///
        /// Failures are logged and swallowed: invalidation is best
        /// effort and entry TTLs bound staleness regardless.
        pub async fn invalidate(&self, pattern: &str) {
            let mut conn = self.conn.clone();
            let result: redis::RedisResult<()> =
                conn.publish(INVALIDATION_CHANNEL, pattern).await;
            if let Err(err) = result {
                error!("failed to publish invalidation message: {err}");
            }
        }

        /// Starts the listener task. Subsequent calls while a listener is
        /// running are no-ops.
        pub fn start(&self, callback: InvalidationCallback) {
            let mut listener =
                self.listener.lock().expect("invalidator lock poisoned");
            if listener.is_some() {
                return;
            }
            let client = self.client.clone();
            *listener = Some(tokio::spawn(async move {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(pubsub) => pubsub,
                    Err(err) => {
                        error!("failed to start invalidation listener: {err}");
                        return;
                    }
                };
                if let Err(err) =
                    pubsub.subscribe(INVALIDATION_CHANNEL).await
                {
                    error!("failed to subscribe to {INVALIDATION_CHANNEL}: {err}");
                    return;
                }
                info!("started distributed invalidation listener");
                let mut messages = pubsub.into_on_message();
                while let Some(message) = messages.next().await {
                    let pattern: String = match message.get_payload() {
                        Ok(pattern) => pattern,
                        Err(err) => {
                            warn!("ignoring malformed invalidation message: {err}");
                            continue;
                        }
                    };
                    debug!("received invalidation signal for pattern: {pattern}");
                    callback(pattern).await;
                }
            }));
        }

        /// Stops the listener task. Idempotent.
        pub fn stop(&self) {
            let mut listener =
                self.listener.lock().expect("invalidator lock poisoned");
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }

    impl Drop for RedisInvalidator {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
