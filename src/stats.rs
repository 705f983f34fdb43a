//! Thread-safe cache statistics.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug)]
struct Counters {
    hits: u64,
    misses: u64,
    errors: u64,
    writes: u64,
    bytes_saved: u64,
    bytes_written: u64,
    total_requests: u64,
    started: Instant,
}

impl Counters {
    fn new() -> Self {
        Self {
            hits: 0,
            misses: 0,
            errors: 0,
            writes: 0,
            bytes_saved: 0,
            bytes_written: 0,
            total_requests: 0,
            started: Instant::now(),
        }
    }
}

/// Mutex-guarded counters kept by the façade. Updates are short and
/// uncontended; reads produce a [`StatsSnapshot`].
#[derive(Debug)]
pub struct CacheStats {
    inner: Mutex<Counters>,
}

/// A point-in-time copy of the counters, with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Requests answered from cache.
    pub hits: u64,
    /// Requests that went upstream.
    pub misses: u64,
    /// Cache-layer failures (corrupt entries, backend errors).
    pub errors: u64,
    /// Successful cache writes.
    pub writes: u64,
    /// Bytes served from cache instead of the network.
    pub bytes_saved: u64,
    /// Bytes written into the cache.
    pub bytes_written: u64,
    /// Total requests seen by the façade.
    pub total_requests: u64,
    /// hits / (hits + misses), zero when idle.
    pub hit_rate: f64,
    /// misses / total_requests, zero when idle.
    pub miss_rate: f64,
    /// Seconds since construction or the last reset.
    pub uptime_seconds: f64,
}

impl CacheStats {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::new()),
        }
    }

    pub(crate) fn increment_hit(&self, bytes_saved: usize) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.hits += 1;
        c.bytes_saved += bytes_saved as u64;
        c.total_requests += 1;
    }

    pub(crate) fn increment_miss(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.misses += 1;
        c.total_requests += 1;
    }

    pub(crate) fn increment_error(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.errors += 1;
    }

    pub(crate) fn increment_write(&self, bytes_written: usize) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        c.writes += 1;
        c.bytes_written += bytes_written as u64;
    }

    /// Zeroes every counter and restarts the uptime clock.
    pub fn reset(&self) {
        let mut c = self.inner.lock().expect("stats lock poisoned");
        *c = Counters::new();
    }

    /// Copies the current counters out.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.inner.lock().expect("stats lock poisoned");
        let lookups = c.hits + c.misses;
        StatsSnapshot {
            hits: c.hits,
            misses: c.misses,
            errors: c.errors,
            writes: c.writes,
            bytes_saved: c.bytes_saved,
            bytes_written: c.bytes_written,
            total_requests: c.total_requests,
            hit_rate: if lookups > 0 {
                c.hits as f64 / lookups as f64
            } else {
                0.0
            },
            miss_rate: if c.total_requests > 0 {
                c.misses as f64 / c.total_requests as f64
            } else {
                0.0
            },
            uptime_seconds: c.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}
