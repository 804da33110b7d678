//! Cache configuration.
//!
//! `CacheConfig` is the single entry point for configuring a [`crate::Cache`]:
//! build one with the builder methods below, then pass it to `Cache::new`.
//!
//! ```
//! use segcache::{CacheConfig, RemovalCause};
//! use std::time::Duration;
//!
//! let config: CacheConfig<String, u64> = CacheConfig::new()
//!     .with_maximum_weight(1024)
//!     .with_weigher(|_k, _v| 1)
//!     .with_expire_after_access(Duration::from_secs(300))
//!     .with_removal_listener(|key, _value, cause| {
//!         if cause == RemovalCause::Evicted {
//!             eprintln!("evicted {key}");
//!         }
//!     });
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Why an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by capacity (weight) or time-based eviction.
    Evicted,
    /// Removed by an explicit `invalidate`/`invalidate_all` call.
    Invalidated,
    /// Removed because `put` overwrote an existing mapping.
    Replaced,
}

type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> i64 + Send + Sync>;
type RemovalListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

/// Construction-time configuration for a [`crate::Cache`]. Never mutated
/// after the cache is built.
pub struct CacheConfig<K, V> {
    pub(crate) expire_after_access_ns: Option<i64>,
    pub(crate) expire_after_write_ns: Option<i64>,
    pub(crate) maximum_weight: Option<i64>,
    pub(crate) weigher: Weigher<K, V>,
    pub(crate) removal_listener: Option<RemovalListener<K, V>>,
}

impl<K, V> Clone for CacheConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            expire_after_access_ns: self.expire_after_access_ns,
            expire_after_write_ns: self.expire_after_write_ns,
            maximum_weight: self.maximum_weight,
            weigher: Arc::clone(&self.weigher),
            removal_listener: self.removal_listener.as_ref().map(Arc::clone),
        }
    }
}

impl<K, V> Default for CacheConfig<K, V> {
    fn default() -> Self {
        Self {
            expire_after_access_ns: None,
            expire_after_write_ns: None,
            maximum_weight: None,
            weigher: Arc::new(|_k: &K, _v: &V| 1),
            removal_listener: None,
        }
    }
}

impl<K, V> CacheConfig<K, V> {
    /// Creates a configuration with no expiry, unlimited weight, a constant-1
    /// weigher, and no removal listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evicts entries whose last access is older than `duration`.
    ///
    /// # Panics
    /// Panics if `duration` is zero.
    #[must_use]
    pub fn with_expire_after_access(mut self, duration: Duration) -> Self {
        assert!(!duration.is_zero(), "expire_after_access must be > 0");
        self.expire_after_access_ns = Some(duration.as_nanos() as i64);
        self
    }

    /// Evicts entries whose write is older than `duration`.
    ///
    /// # Panics
    /// Panics if `duration` is zero.
    #[must_use]
    pub fn with_expire_after_write(mut self, duration: Duration) -> Self {
        assert!(!duration.is_zero(), "expire_after_write must be > 0");
        self.expire_after_write_ns = Some(duration.as_nanos() as i64);
        self
    }

    /// Sets an upper bound on total weight; exceeding it triggers tail
    /// eviction.
    ///
    /// # Panics
    /// Panics if `max_weight` is negative.
    #[must_use]
    pub fn with_maximum_weight(mut self, max_weight: i64) -> Self {
        assert!(max_weight >= 0, "maximum_weight must be >= 0");
        self.maximum_weight = Some(max_weight);
        self
    }

    /// Assigns a non-negative weight to each entry. Defaults to a constant 1,
    /// which makes `maximum_weight` behave as an entry-count cap.
    #[must_use]
    pub fn with_weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> i64 + Send + Sync + 'static,
    {
        self.weigher = Arc::new(weigher);
        self
    }

    /// Registers a listener invoked for every removal. Must be
    /// reentrancy-safe: it may be called while another thread is already
    /// calling back into the cache for the same key.
    #[must_use]
    pub fn with_removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.removal_listener = Some(Arc::new(listener));
        self
    }
}

impl<K, V> std::fmt::Debug for CacheConfig<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("expire_after_access_ns", &self.expire_after_access_ns)
            .field("expire_after_write_ns", &self.expire_after_write_ns)
            .field("maximum_weight", &self.maximum_weight)
            .field("has_removal_listener", &self.removal_listener.is_some())
            .finish()
    }
}
