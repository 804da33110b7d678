//! Cache entries.
//!
//! An entry pairs an immutable key/value with mutable bookkeeping: the last
//! access/write timestamps (read under a segment lock, written under a segment
//! lock or by the coordinator) and a state/list-node pair that only the
//! coordinator thread ever touches.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use crate::list::ListNode;
use std::cell::UnsafeCell;
use std::sync::Arc;

/// Lifecycle state of a [`CacheEntry`].
///
/// Only the coordinator thread ever transitions an entry's state or touches
/// its list-node pointer; other threads only ever read `state()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum EntryState {
    /// Installed in a segment but not yet linked into the LRU list.
    New = 0,
    /// Linked into the LRU list.
    Existing = 1,
    /// Unlinked; must never be re-promoted.
    Deleted = 2,
}

impl EntryState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EntryState::New,
            1 => EntryState::Existing,
            _ => EntryState::Deleted,
        }
    }
}

/// A single cached (key, value) pair plus the timestamps and list linkage the
/// coordinator needs to keep LRU order and drive expiry.
///
/// `key` and `value` never change after construction. `write_time_ns` is set
/// once, at construction. `access_time_ns` is advanced on every `get` that
/// observes this entry. `state` and the list-node pointer are coordinator-only.
pub(crate) struct CacheEntry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    write_time_ns: AtomicI64,
    access_time_ns: AtomicI64,
    state: AtomicU8,
    // SAFETY: only ever read or written by the coordinator thread. No other
    // thread dereferences this pointer or observes its value.
    node: UnsafeCell<*mut ListNode<Arc<CacheEntry<K, V>>>>,
}

// SAFETY: the `UnsafeCell<*mut _>` is confined to the coordinator thread by
// construction (see `list.rs`, `coordinator.rs`); every other access to a
// `CacheEntry` only touches `key`, `value`, the atomics, or calls `state()`.
unsafe impl<K: Send, V: Send> Send for CacheEntry<K, V> {}
// SAFETY: see above; shared references never dereference `node`.
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for CacheEntry<K, V> {}

impl<K, V> CacheEntry<K, V> {
    /// Creates a new entry in state `New`, with `write_time_ns` and
    /// `access_time_ns` both set to `now`.
    pub(crate) fn new(key: K, value: V, now: i64) -> Self {
        Self {
            key,
            value,
            write_time_ns: AtomicI64::new(now),
            access_time_ns: AtomicI64::new(now),
            state: AtomicU8::new(EntryState::New as u8),
            node: UnsafeCell::new(std::ptr::null_mut()),
        }
    }

    /// Returns the last-access timestamp, in nanoseconds since the cache's
    /// reference instant.
    pub(crate) fn access_time(&self) -> i64 {
        self.access_time_ns.load(Ordering::Relaxed)
    }

    /// Returns the write timestamp, in nanoseconds since the cache's
    /// reference instant.
    pub(crate) fn write_time(&self) -> i64 {
        self.write_time_ns.load(Ordering::Relaxed)
    }

    /// Advances the access timestamp. Called under the segment's read lock in
    /// `get`; a torn read by a concurrent reader yields either the old or the
    /// new value, never a mix, because `i64` stores are atomic.
    pub(crate) fn touch(&self, now: i64) {
        self.access_time_ns.store(now, Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: EntryState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Returns the list-node pointer stashed by the coordinator when this
    /// entry was linked.
    ///
    /// # Safety
    /// Must only be called from the coordinator thread.
    pub(crate) unsafe fn node(&self) -> *mut ListNode<Arc<CacheEntry<K, V>>> {
        // SAFETY: caller guarantees this runs on the coordinator thread, the
        // sole writer and reader of `node`.
        unsafe { *self.node.get() }
    }

    /// Stashes the list-node pointer created when this entry was linked.
    ///
    /// # Safety
    /// Must only be called from the coordinator thread.
    pub(crate) unsafe fn set_node(&self, ptr: *mut ListNode<Arc<CacheEntry<K, V>>>) {
        // SAFETY: caller guarantees this runs on the coordinator thread.
        unsafe {
            *self.node.get() = ptr;
        }
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("write_time_ns", &self.write_time())
            .field("access_time_ns", &self.access_time())
            .field("state", &self.state())
            .finish()
    }
}
