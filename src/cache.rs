//! The public cache facade.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;

use crate::config::{CacheConfig, RemovalCause};
use crate::coordinator::{self, Barrier, Op, Totals};
use crate::entry::{CacheEntry, EntryState};
use crate::error::{CacheError, LoaderFailure};
use crate::promise::Promise;
use crate::segment::{segment_index, Segment, SEGMENT_COUNT};
use crate::stats::CacheStats;

#[cfg(feature = "hashbrown")]
type DefaultHashBuilder = hashbrown::DefaultHashBuilder;
#[cfg(not(feature = "hashbrown"))]
type DefaultHashBuilder = RandomState;

/// A segmented, concurrent, in-process key/value cache with optional
/// time- and weight-based eviction, LRU ordering, single-flight loading, and
/// removal notifications.
///
/// Cheaply constructed once and shared across threads behind an `Arc` (the
/// facade itself requires no external synchronization to call concurrently).
/// Dropping the last handle joins the background coordinator thread.
pub struct Cache<K, V, S = DefaultHashBuilder> {
    segments: Arc<[Segment<K, V, S>]>,
    hash_builder: S,
    config: Arc<CacheConfig<K, V>>,
    totals: Arc<Totals>,
    start: Instant,
    ops_tx: Option<Sender<Op<K, V>>>,
    coordinator: Option<std::thread::JoinHandle<()>>,
}

// SAFETY: every field is either `Send + Sync` on its own (`Arc`, `Sender`,
// `JoinHandle`) or, for `hash_builder`, bounded by the impls below.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Send for Cache<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Sync for Cache<K, V, S> {}

impl<K, V> Cache<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a cache from `config`, starting its background coordinator
    /// thread.
    pub fn new(config: CacheConfig<K, V>) -> Self {
        Self::with_hasher(config, DefaultHashBuilder::default())
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Default + Clone + Send + Sync + 'static,
{
    /// Builds a cache from `config` with an explicit hasher, starting its
    /// background coordinator thread.
    pub fn with_hasher(config: CacheConfig<K, V>, hash_builder: S) -> Self {
        tracing::info!(
            segments = SEGMENT_COUNT,
            maximum_weight = ?config.maximum_weight,
            expire_after_access_ns = ?config.expire_after_access_ns,
            expire_after_write_ns = ?config.expire_after_write_ns,
            "constructing cache"
        );
        let segments: Arc<[Segment<K, V, S>]> =
            (0..SEGMENT_COUNT).map(|_| Segment::new()).collect();
        let config = Arc::new(config);
        let totals = Arc::new(Totals::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        let coordinator = coordinator::spawn(
            rx,
            Arc::clone(&segments),
            hash_builder.clone(),
            Arc::clone(&config),
            Arc::clone(&totals),
        );
        Cache {
            segments,
            hash_builder,
            config,
            totals,
            start: Instant::now(),
            ops_tx: Some(tx),
            coordinator: Some(coordinator),
        }
    }

    fn send(&self, op: Op<K, V>) {
        if let Some(tx) = &self.ops_tx {
            let _ = tx.send(op);
        }
    }

    /// Returns zero when neither time-based expiry is configured, to avoid
    /// reading the clock on every call.
    fn now(&self) -> i64 {
        if self.config.expire_after_access_ns.is_none() && self.config.expire_after_write_ns.is_none() {
            0
        } else {
            self.start.elapsed().as_nanos() as i64
        }
    }

    fn index<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        segment_index::<K, Q, S>(&self.hash_builder, key)
    }

    fn is_expired(&self, entry: &CacheEntry<K, V>, now: i64) -> bool {
        if let Some(ttl) = self.config.expire_after_access_ns {
            if now - entry.access_time() > ttl {
                return true;
            }
        }
        if let Some(ttl) = self.config.expire_after_write_ns {
            if now - entry.write_time() > ttl {
                return true;
            }
        }
        false
    }

    /// Enqueues a promotion: relink (existing entry) or link (new entry) at
    /// the head of the LRU list, followed by an eviction pass. A `Deleted`
    /// entry is never promoted.
    fn promote(&self, entry: &Arc<CacheEntry<K, V>>, now: i64) {
        match entry.state() {
            EntryState::Deleted => {}
            EntryState::Existing => {
                self.send(Op::RelinkAtHead(Arc::clone(entry)));
                self.send(Op::Evict(now));
            }
            EntryState::New => {
                self.send(Op::LinkAtHead(Arc::clone(entry)));
                self.send(Op::Evict(now));
            }
        }
    }

    /// Returns the cached value for `key`, or `None` if absent or expired.
    /// A successful lookup enqueues a promotion to the head of the LRU list.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let idx = self.index(key);
        let entry = self.segments[idx].get(key, now, |e, n| self.is_expired(e, n))?;
        self.promote(&entry, now);
        Some(entry.value.clone())
    }

    /// Installs `value` for `key`, returning whatever value was previously
    /// mapped there. If a prior mapping existed and was live, a `Replaced`
    /// removal notification is fired for it.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let now = self.now();
        let idx = self.index(&key);
        let (new_entry, previous) = self.segments[idx].put(key, value, now);
        if let Some(prev) = &previous {
            // `prev` may still be `New` here: its own `LinkAtHead` was enqueued
            // by the earlier `put` and may not have reached the coordinator
            // yet. Enqueue the delete unconditionally; the coordinator's
            // `unlink` only fires the notification once `prev` is actually
            // `Existing`, so ordering (not this thread's view of `state()`) is
            // what gates the `Replaced` notification.
            self.send(Op::Delete(Arc::clone(prev), RemovalCause::Replaced));
        }
        self.promote(&new_entry, now);
        previous.map(|e| e.value.clone())
    }

    /// Removes `key`, if present. Fires an `Invalidated` removal
    /// notification for it.
    pub fn invalidate<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index(key);
        if let Some(entry) = self.segments[idx].remove(key) {
            self.send(Op::Delete(entry, RemovalCause::Invalidated));
        }
    }

    /// Clears every segment and the LRU list. Blocks until the coordinator
    /// has drained every operation enqueued before this call and fired an
    /// `Invalidated` notification for each entry that was live when it began.
    pub fn invalidate_all(&self) {
        let barrier = Barrier::new();
        self.send(Op::InvalidateAll(Arc::clone(&barrier)));
        barrier.wait();
    }

    /// Runs a weight/expiry eviction pass and blocks until it completes.
    /// After this returns, `weight() <= maximum_weight` (if configured).
    pub fn refresh(&self) {
        let now = self.now();
        let barrier = Barrier::new();
        self.send(Op::Evict(now));
        self.send(Op::Barrier(Arc::clone(&barrier)));
        barrier.wait();
    }

    /// Looks up `key`'s value, computing and inserting it with `loader` if
    /// absent. At most one loader invocation is in progress at a time for a
    /// given key across all threads; concurrent callers all observe the
    /// leader's result, including its failure.
    pub fn compute_if_absent<F, E>(&self, key: K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Result<Option<V>, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let now = self.now();
        let idx = self.index(&key);

        if let Some(entry) = self.segments[idx].get(&key, now, |e, n| self.is_expired(e, n)) {
            self.promote(&entry, now);
            return Ok(entry.value.clone());
        }

        let promise = Arc::new(Promise::pending());
        match self.segments[idx].put_if_absent_or_expired_promise(
            key.clone(),
            Arc::clone(&promise),
            now,
            |e, n| self.is_expired(e, n),
        ) {
            Some(existing) => self.await_follower(&key, idx, existing, now),
            None => self.run_as_leader(&key, idx, &promise, loader, now),
        }
    }

    fn await_follower(
        &self,
        key: &K,
        idx: usize,
        promise: Arc<Promise<Arc<CacheEntry<K, V>>>>,
        now: i64,
    ) -> Result<V, CacheError> {
        match promise.wait() {
            Ok(entry) => {
                self.promote(&entry, now);
                Ok(entry.value.clone())
            }
            Err(err) => {
                self.segments[idx].remove_if_same(key, &promise);
                Err(err)
            }
        }
    }

    fn run_as_leader<F, E>(
        &self,
        key: &K,
        idx: usize,
        promise: &Arc<Promise<Arc<CacheEntry<K, V>>>>,
        loader: F,
        now: i64,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Result<Option<V>, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match loader() {
            Ok(Some(value)) => {
                let entry = Arc::new(CacheEntry::new(key.clone(), value.clone(), now));
                promise.complete(Arc::clone(&entry));
                self.promote(&entry, now);
                Ok(value)
            }
            Ok(None) => {
                let err = CacheError::NullLoader;
                promise.fail(err.clone());
                self.segments[idx].remove_if_same(key, promise);
                Err(err)
            }
            Err(e) => {
                tracing::warn!(error = %e, "loader failed");
                let err = CacheError::Loader(LoaderFailure(Arc::new(e)));
                promise.fail(err.clone());
                self.segments[idx].remove_if_same(key, promise);
                Err(err)
            }
        }
    }

    /// Returns every live key, in LRU order (most-recently-promoted first).
    /// A consistent snapshot: not a live, mutation-synchronized cursor.
    pub fn keys(&self) -> Vec<K> {
        self.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    /// Returns every live value, in LRU order (most-recently-promoted
    /// first). A consistent snapshot: not a live, mutation-synchronized
    /// cursor.
    pub fn values(&self) -> Vec<V> {
        self.snapshot().into_iter().map(|(_, v)| v).collect()
    }

    fn snapshot(&self) -> Vec<(K, V)> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(Op::Snapshot(tx));
        rx.recv().unwrap_or_default()
    }

    /// Best-effort snapshot of (hits, misses, evictions), summed across
    /// segments.
    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for segment in self.segments.iter() {
            let s = segment.stats();
            total.hits += s.hits;
            total.misses += s.misses;
            total.evictions += s.evictions;
        }
        total
    }

    /// Best-effort current entry count.
    pub fn count(&self) -> i64 {
        self.totals.count.load(Ordering::Relaxed)
    }

    /// Best-effort current total weight.
    pub fn weight(&self) -> i64 {
        self.totals.weight.load(Ordering::Relaxed)
    }
}

impl<K, V, S> Drop for Cache<K, V, S> {
    fn drop(&mut self) {
        // Drop the sender first so the coordinator's `recv()` observes a
        // disconnected channel and exits its loop, then join it.
        self.ops_tx.take();
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
    }
}

impl<K, V, S> std::fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("count", &self.count())
            .field("weight", &self.weight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn cache() -> Cache<String, i32> {
        Cache::new(CacheConfig::new())
    }

    #[test]
    fn basic_miss_then_hit() {
        let c = cache();
        assert_eq!(c.get("a"), None);
        c.put("a".to_string(), 1);
        assert_eq!(c.get("a"), Some(1));
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn replacement_fires_replaced_notification() {
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let n2 = Arc::clone(&notifications);
        let config = CacheConfig::new().with_removal_listener(move |k: &String, v: &i32, cause| {
            n2.lock().unwrap().push((k.clone(), *v, cause));
        });
        let c: Cache<String, i32> = Cache::new(config);
        c.put("a".to_string(), 1);
        c.put("a".to_string(), 2);
        c.refresh();
        assert_eq!(c.get("a"), Some(2));
        let seen = notifications.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("a".to_string(), 1, RemovalCause::Replaced));
    }

    #[test]
    fn weight_based_eviction_keeps_weight_bounded() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let e2 = Arc::clone(&evicted);
        let config = CacheConfig::new()
            .with_maximum_weight(2)
            .with_removal_listener(move |k: &String, _v: &i32, cause| {
                if cause == RemovalCause::Evicted {
                    e2.lock().unwrap().push(k.clone());
                }
            });
        let c: Cache<String, i32> = Cache::new(config);
        c.put("a".to_string(), 1);
        c.put("b".to_string(), 2);
        c.put("c".to_string(), 3);
        c.refresh();
        assert_eq!(c.count(), 2);
        assert_eq!(evicted.lock().unwrap().as_slice(), ["a"]);
    }

    #[test]
    fn expiry_hides_stale_entries() {
        let config: CacheConfig<String, i32> =
            CacheConfig::new().with_expire_after_write(std::time::Duration::from_nanos(1));
        let c = Cache::new(config);
        c.put("a".to_string(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(c.get("a"), None);
    }

    #[test]
    fn single_flight_invokes_loader_once_under_contention() {
        let c: Arc<Cache<String, i32>> = Arc::new(cache());
        let counter = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = Arc::clone(&c);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    c.compute_if_absent("k".to_string(), || {
                        let v = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok::<_, std::convert::Infallible>(Some(v as i32))
                    })
                })
            })
            .collect();
        let results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|&v| v == 1));
    }

    #[test]
    fn dependent_key_loader_does_not_deadlock() {
        let c: Arc<Cache<String, i32>> = Arc::new(cache());
        let c2 = Arc::clone(&c);
        let result = c.compute_if_absent("k1".to_string(), move || {
            c2.compute_if_absent("k2".to_string(), || Ok::<_, std::convert::Infallible>(Some(2)))
                .map(Some)
                .map_err(|_| std::io::Error::other("nested failure"))
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(c.get("k2"), Some(2));
    }

    #[test]
    fn loader_failure_is_reported_and_clears_the_tombstone() {
        let c = cache();
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "boom")
            }
        }
        impl std::error::Error for Boom {}

        let result = c.compute_if_absent("a".to_string(), || Err::<i32, _>(Boom));
        assert!(result.is_err());
        // A later successful load for the same key must succeed (tombstone cleared).
        let retried = c.compute_if_absent("a".to_string(), || Ok::<_, std::convert::Infallible>(Some(5)));
        assert_eq!(retried.unwrap(), 5);
    }

    #[test]
    fn null_loader_result_is_a_distinct_error() {
        let c = cache();
        let result = c.compute_if_absent("a".to_string(), || Ok::<_, std::convert::Infallible>(None));
        assert_eq!(result, Err(CacheError::NullLoader));
    }

    #[test]
    fn invalidate_all_clears_count_and_weight() {
        let c = cache();
        c.put("a".to_string(), 1);
        c.put("b".to_string(), 2);
        c.refresh();
        c.invalidate_all();
        assert_eq!(c.count(), 0);
        assert_eq!(c.weight(), 0);
        assert_eq!(c.get("a"), None);
    }

    #[test]
    fn keys_and_values_reflect_live_entries() {
        let c = cache();
        c.put("a".to_string(), 1);
        c.put("b".to_string(), 2);
        c.refresh();
        let mut keys = c.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        let mut values = c.values();
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn stats_never_decrease() {
        let c = cache();
        c.put("a".to_string(), 1);
        c.get("a");
        c.get("missing");
        let first = c.stats();
        c.get("a");
        let second = c.stats();
        assert!(second.hits >= first.hits);
        assert!(second.misses >= first.misses);
    }
}
