//! Circuit breaker around backend I/O.
//!
//! After a run of failures the breaker fails fast instead of hammering a
//! dead backend, then periodically lets a single probe through to detect
//! recovery.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Operations pass through; failures are counted.
    Closed,
    /// Operations fail fast until the recovery timeout elapses.
    Open,
    /// One probe operation is allowed through.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not attempted.
    Open {
        /// Time remaining until the next recovery probe is allowed.
        retry_in: Duration,
    },
    /// The operation ran and failed.
    Inner(E),
}

impl<E: Into<crate::Error>> From<BreakerError<E>> for crate::Error {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open { .. } => crate::Error::CircuitOpen,
            BreakerError::Inner(inner) => inner.into(),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// A three-state circuit breaker.
///
/// State reads and writes are mutually exclusive; the guarded operation
/// itself always runs outside the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker that opens after `threshold` failures and
    /// probes recovery `timeout` after the last failure.
    #[must_use]
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Runs `op` under breaker protection.
    ///
    /// In `Open` state the call fails fast with [`BreakerError::Open`]
    /// until the recovery timeout has elapsed, at which point the next
    /// call transitions to `HalfOpen` and runs as the probe. A probe
    /// success closes the circuit and zeroes the failure count; any
    /// failure reopens it.
    pub async fn call<F, Fut, T, E>(
        &self,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if inner.state == BreakerState::Open {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.timeout {
                    info!("circuit breaker transitioning to HALF_OPEN");
                    inner.state = BreakerState::HalfOpen;
                } else {
                    return Err(BreakerError::Open {
                        retry_in: self.timeout.saturating_sub(elapsed),
                    });
                }
            }
        }

        match op().await {
            Ok(value) => {
                let mut inner =
                    self.inner.lock().expect("breaker lock poisoned");
                if inner.state == BreakerState::HalfOpen {
                    info!("circuit breaker recovered, transitioning to CLOSED");
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                }
                Ok(value)
            }
            Err(err) => {
                let mut inner =
                    self.inner.lock().expect("breaker lock poisoned");
                inner.failures += 1;
                inner.last_failure = Some(Instant::now());
                if inner.failures >= self.threshold {
                    if inner.state != BreakerState::Open {
                        warn!(
                            "circuit breaker opening after {} failures",
                            inner.failures
                        );
                    }
                    inner.state = BreakerState::Open;
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Forces the breaker closed and zeroes the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        info!("circuit breaker manually reset to CLOSED");
    }

    /// Current state, without transitioning.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("backend down") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            assert!(matches!(
                fail(&breaker).await,
                Err(BreakerError::Inner(_))
            ));
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        // Fourth call fails fast without running the operation.
        assert!(matches!(
            fail(&breaker).await,
            Err(BreakerError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn probes_after_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(100));
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);

        // Failure count was zeroed: a single new failure stays closed.
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(
            fail(&breaker).await,
            Err(BreakerError::Inner(_))
        ));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn manual_reset_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn success_passes_value_through() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let value = breaker
            .call(|| async { Ok::<_, &'static str>(41 + 1) })
            .await;
        assert!(matches!(value, Ok(42)));
    }
}
