//! Hash-partitioned shards of the key space.
//!
//! A `Segment` holds a map from key to a [`Promise`] of an entry, guarded by
//! its own read/write lock, plus independent hit/miss/eviction counters. It
//! never touches the LRU list — that is the coordinator's job alone (see
//! `coordinator.rs`). Separating lock scope from promise completion is what
//! keeps a loader invoked for one key from deadlocking against another key
//! that hashes to the same segment.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::entry::CacheEntry;
use crate::promise::Promise;
use crate::stats::{CacheStats, Counters};

/// Fixed at 256 segments; a key's segment is the low eight bits of its hash.
pub(crate) const SEGMENT_COUNT: usize = 256;

pub(crate) fn segment_index<K, Q, S>(hash_builder: &S, key: &Q) -> usize
where
    K: Borrow<Q>,
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    (hash_builder.hash_one(key) as usize) & (SEGMENT_COUNT - 1)
}

type EntryPromise<K, V> = Arc<Promise<Arc<CacheEntry<K, V>>>>;

pub(crate) struct Segment<K, V, S> {
    map: RwLock<HashMap<K, EntryPromise<K, V>, S>>,
    counters: Counters,
}

impl<K, V, S> Segment<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    pub(crate) fn new() -> Self {
        Segment {
            map: RwLock::new(HashMap::default()),
            counters: Counters::default(),
        }
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Looks up `key`; on success records a hit and touches the entry's
    /// access time, on failure, absence, or expiry records a miss.
    ///
    /// `is_expired` is evaluated against the entry's access/write time as it
    /// stood *before* this call, so an access-expired entry is correctly seen
    /// as expired even though `get` is the thing that would otherwise refresh
    /// it; only a non-expired hit advances the access time.
    pub(crate) fn get<Q>(
        &self,
        key: &Q,
        now: i64,
        is_expired: impl Fn(&CacheEntry<K, V>, i64) -> bool,
    ) -> Option<Arc<CacheEntry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let promise = {
            let guard = self.map.read();
            guard.get(key).cloned()
        };
        match promise {
            Some(p) => match p.wait() {
                Ok(entry) => {
                    if is_expired(&entry, now) {
                        self.counters.record_miss();
                        return None;
                    }
                    entry.touch(now);
                    self.counters.record_hit();
                    Some(entry)
                }
                Err(_) => {
                    self.counters.record_miss();
                    None
                }
            },
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    /// Installs a fresh entry for `key`, returning it along with whatever
    /// entry was previously mapped there (if its promise resolved
    /// successfully).
    pub(crate) fn put(
        &self,
        key: K,
        value: V,
        now: i64,
    ) -> (Arc<CacheEntry<K, V>>, Option<Arc<CacheEntry<K, V>>>) {
        let entry = Arc::new(CacheEntry::new(key.clone(), value, now));
        let new_promise = Arc::new(Promise::ready(Arc::clone(&entry)));
        let previous = {
            let mut guard = self.map.write();
            guard.insert(key, new_promise)
        };
        let previous_entry = previous.and_then(|p| p.wait().ok());
        (entry, previous_entry)
    }

    /// Removes `key`'s mapping, returning its entry if the removed promise
    /// had resolved successfully.
    pub(crate) fn remove<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = {
            let mut guard = self.map.write();
            guard.remove(key)
        };
        let entry = removed.and_then(|p| p.wait().ok());
        if entry.is_some() {
            self.counters.record_eviction();
        }
        entry
    }

    /// Atomically installs `promise` if no mapping currently exists for
    /// `key`, returning the prior promise if one did (the single-flight
    /// protocol's "am I the leader?" check).
    pub(crate) fn put_if_absent_promise(
        &self,
        key: K,
        promise: EntryPromise<K, V>,
    ) -> Option<EntryPromise<K, V>> {
        let mut guard = self.map.write();
        match guard.get(&key) {
            Some(existing) => Some(Arc::clone(existing)),
            None => {
                guard.insert(key, promise);
                None
            }
        }
    }

    /// Atomically installs `promise` if no mapping currently exists for
    /// `key`, *or* if the existing mapping has already resolved to an entry
    /// `is_expired` deems stale — returning the prior promise otherwise (the
    /// single-flight protocol's "am I the leader?" check).
    ///
    /// Used by `compute_if_absent`'s install step instead of
    /// `put_if_absent_promise`: without this, an expired entry that `get`
    /// correctly treats as a miss would still be the mapping a concurrent
    /// `compute_if_absent` installs itself as a follower of, handing callers
    /// the stale value until an unrelated eviction happens to reach it.
    pub(crate) fn put_if_absent_or_expired_promise(
        &self,
        key: K,
        promise: EntryPromise<K, V>,
        now: i64,
        is_expired: impl Fn(&CacheEntry<K, V>, i64) -> bool,
    ) -> Option<EntryPromise<K, V>> {
        let mut guard = self.map.write();
        match guard.get(&key) {
            Some(existing) => match existing.try_get() {
                Some(Ok(entry)) if is_expired(&entry, now) => {
                    guard.insert(key, promise);
                    None
                }
                _ => Some(Arc::clone(existing)),
            },
            None => {
                guard.insert(key, promise);
                None
            }
        }
    }

    /// Removes `key`'s mapping only if it is still exactly `promise` — used
    /// to clear a failed single-flight tombstone without racing a concurrent
    /// `put` that already replaced it.
    pub(crate) fn remove_if_same<Q>(&self, key: &Q, promise: &EntryPromise<K, V>)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.map.write();
        if let Some(current) = guard.get(key) {
            if Arc::ptr_eq(current, promise) {
                guard.remove(key);
            }
        }
    }

    /// Acquires the segment's write lock directly, for `invalidate_all`'s
    /// fixed-order multi-segment lock/clear/unlock sequence.
    pub(crate) fn write_lock(
        &self,
    ) -> parking_lot::RwLockWriteGuard<'_, HashMap<K, EntryPromise<K, V>, S>> {
        self.map.write()
    }
}

impl<K, V, S> std::fmt::Debug for Segment<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.map.read().len())
            .finish()
    }
}
