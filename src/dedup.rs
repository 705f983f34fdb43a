//! Single-flight request deduplication.
//!
//! While a fetch for a key is in flight, every other caller for that key
//! waits on the fetch and receives its result (or its error) instead of
//! going upstream itself. This stops thundering herds on cold keys.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::UpstreamError;
use crate::HttpResponse;

/// How long a completed result stays readable for late waiters after the
/// in-flight slot is removed.
const GRACE_CLEANUP: Duration = Duration::from_millis(50);

type Outcome = Result<HttpResponse, UpstreamError>;

#[derive(Debug, Default)]
struct Tables {
    /// Completion signals for fetches currently in flight. The receiver
    /// retains the last value, so a waiter that subscribes just before
    /// completion still observes it.
    in_flight: HashMap<String, watch::Receiver<bool>>,
    /// Results of recently completed fetches, kept through the grace
    /// window.
    results: HashMap<String, Outcome>,
}

/// Coalesces concurrent fetches per cache key.
///
/// One mutex guards both tables; the fetch itself always runs outside
/// the critical section. Cancelling a waiter never cancels the in-flight
/// fetch.
#[derive(Debug)]
pub struct Deduplicator {
    tables: Arc<Mutex<Tables>>,
    timeout: Duration,
}

enum Role {
    Fetcher(watch::Sender<bool>),
    Waiter(watch::Receiver<bool>),
}

impl Deduplicator {
    /// Creates a deduplicator whose waiters give up after `timeout` and
    /// fall back to fetching directly.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            timeout,
        }
    }

    /// Returns the in-flight result for `key`, fetching it if nobody else
    /// is.
    ///
    /// The first caller for a key becomes the fetcher and runs `fetch`;
    /// everyone else waits for its completion signal and reads the
    /// recorded outcome. A waiter that times out, or that loses the
    /// cleanup race, fetches directly: coalescing is traded for
    /// progress, never the other way around.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let role = {
            let mut tables = self.tables.lock().expect("dedup lock poisoned");
            match tables.in_flight.get(key) {
                Some(rx) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    tables.in_flight.insert(key.to_string(), rx);
                    Role::Fetcher(tx)
                }
            }
        };

        match role {
            Role::Fetcher(done) => {
                let outcome = fetch().await;
                {
                    let mut tables =
                        self.tables.lock().expect("dedup lock poisoned");
                    tables.results.insert(key.to_string(), outcome.clone());
                    // Dropped immediately so sequential callers start a
                    // fresh fetch instead of reading a settled result.
                    tables.in_flight.remove(key);
                }
                let _ = done.send(true);
                self.schedule_cleanup(key.to_string());
                outcome
            }
            Role::Waiter(mut rx) => {
                let _ = tokio::time::timeout(
                    self.timeout,
                    rx.wait_for(|done| *done),
                )
                .await;
                let recorded = {
                    let tables =
                        self.tables.lock().expect("dedup lock poisoned");
                    tables.results.get(key).cloned()
                };
                match recorded {
                    Some(outcome) => outcome,
                    None => fetch().await,
                }
            }
        }
    }

    /// Number of fetches currently in flight, for introspection.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tables.lock().expect("dedup lock poisoned").in_flight.len()
    }

    fn schedule_cleanup(&self, key: String) {
        let tables = Arc::clone(&self.tables);
        tokio::spawn(async move {
            tokio::time::sleep(GRACE_CLEANUP).await;
            let mut tables = tables.lock().expect("dedup lock poisoned");
            tables.results.remove(&key);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpVersion;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn response(n: usize) -> HttpResponse {
        HttpResponse {
            status: 200,
            url: Url::parse("https://example.com/slow").unwrap(),
            version: HttpVersion::Http11,
            reason: None,
            headers: HashMap::new(),
            encoding: None,
            body: format!("ok-{n}").into_bytes(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_fetch() {
        let dedup = Arc::new(Deduplicator::new(Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                dedup
                    .get_or_fetch("k", || async {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(response(n))
                    })
                    .await
            }));
        }

        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(handle.await.unwrap().unwrap().body);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bodies.iter().all(|b| b == &bodies[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn errors_propagate_to_every_waiter() {
        let dedup = Arc::new(Deduplicator::new(Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                dedup
                    .get_or_fetch("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(UpstreamError::new("boom".into()))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_fetch_independently() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = dedup
                .get_or_fetch("k", || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(response(n))
                })
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slot_is_removed_after_completion() {
        let dedup = Deduplicator::new(Duration::from_secs(5));
        let _ = dedup.get_or_fetch("k", || async { Ok(response(1)) }).await;
        assert_eq!(dedup.in_flight(), 0);
    }
}
