#![doc = include_str!("../README.md")]

/// Cache entries.
///
/// A `CacheEntry<K, V>` pairs an immutable key/value with the mutable
/// bookkeeping the segment and coordinator need: access/write timestamps and
/// a lifecycle state (`NEW`/`EXISTING`/`DELETED`) plus list linkage that only
/// the coordinator thread ever touches.
pub(crate) mod entry;

/// The coordinator-exclusive doubly-linked LRU list.
///
/// **Note**: internal infrastructure, not exposed to callers. Raw-pointer
/// splice operations that require the coordinator-single-owner invariant to
/// stay sound; use [`Cache`] instead.
pub(crate) mod list;

/// Hash-partitioned shards of the key space.
///
/// Each [`Segment`](crate::segment::Segment) owns a map from key to a promise
/// of an entry, guarded by its own read/write lock, plus independent
/// hit/miss/eviction counters.
pub(crate) mod segment;

/// Single-flight completion cells used to serialize concurrent loaders for
/// the same key.
pub(crate) mod promise;

/// The single-consumer worker that owns the LRU list and global totals.
pub(crate) mod coordinator;

/// Cache configuration.
///
/// Provides [`CacheConfig`], the builder used to assemble expiry, weight,
/// weigher, and removal-listener settings before constructing a [`Cache`].
pub mod config;

/// Error types returned by [`Cache::compute_if_absent`].
pub mod error;

/// Aggregated cache statistics.
pub mod stats;

/// The public cache facade.
mod cache;

pub use cache::Cache;
pub use config::{CacheConfig, RemovalCause};
pub use error::{CacheError, LoaderFailure};
pub use stats::CacheStats;
