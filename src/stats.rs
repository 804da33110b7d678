//! Aggregated cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-segment hit/miss/eviction counters.
///
/// Independent monotonic counters; reads are best-effort and not a
/// point-in-time consistent view across segments.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A best-effort snapshot of a cache's hit/miss/eviction counters, summed
/// across all segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get`/`compute_if_absent` calls that found a live value.
    pub hits: u64,
    /// Number of `get`/`compute_if_absent` calls that did not.
    pub misses: u64,
    /// Number of entries removed by capacity or expiry eviction.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of requests that were hits, or `0.0` if there were none.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.hits + self.misses;
        if requests == 0 {
            0.0
        } else {
            self.hits as f64 / requests as f64
        }
    }
}
