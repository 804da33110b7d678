//! The single-consumer worker that owns the LRU list.
//!
//! Every structural mutation — linking, relinking, unlinking, eviction,
//! bulk invalidation — is expressed as an [`Op`] and sent down a
//! `crossbeam_channel`. The coordinator thread drains that channel strictly
//! in order, so the list, the global count/weight totals, and the removal
//! notifications it fires are all trivially consistent with each other: one
//! thread, one order, no locking.

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};

use crate::config::{CacheConfig, RemovalCause};
use crate::entry::{CacheEntry, EntryState};
use crate::list::List;
use crate::segment::{segment_index, Segment};

/// A synchronous rendezvous point: the caller blocks in [`Barrier::wait`]
/// until the coordinator calls [`Barrier::signal`] after draining every
/// operation enqueued ahead of it.
pub(crate) struct Barrier {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Barrier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Barrier {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self) {
        let mut guard = self.done.lock();
        *guard = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut guard = self.done.lock();
        while !*guard {
            self.cond.wait(&mut guard);
        }
    }
}

/// Structural operations the coordinator applies against the LRU list and
/// segment maps, in enqueue order.
pub(crate) enum Op<K, V> {
    LinkAtHead(Arc<CacheEntry<K, V>>),
    RelinkAtHead(Arc<CacheEntry<K, V>>),
    Delete(Arc<CacheEntry<K, V>>, RemovalCause),
    Evict(i64),
    InvalidateAll(Arc<Barrier>),
    Barrier(Arc<Barrier>),
    Snapshot(crossbeam_channel::Sender<Vec<(K, V)>>),
}

/// Global totals, written only by the coordinator and read without locking
/// by the facade's `count()`/`weight()`.
#[derive(Debug, Default)]
pub(crate) struct Totals {
    pub(crate) count: AtomicI64,
    pub(crate) weight: AtomicI64,
}

fn is_expired<K, V>(entry: &CacheEntry<K, V>, now: i64, config: &CacheConfig<K, V>) -> bool {
    if let Some(ttl) = config.expire_after_access_ns {
        if now - entry.access_time() > ttl {
            return true;
        }
    }
    if let Some(ttl) = config.expire_after_write_ns {
        if now - entry.write_time() > ttl {
            return true;
        }
    }
    false
}

fn should_prune<K, V>(
    entry: &CacheEntry<K, V>,
    now: i64,
    config: &CacheConfig<K, V>,
    totals: &Totals,
) -> bool {
    if let Some(max) = config.maximum_weight {
        if totals.weight.load(Ordering::Relaxed) > max {
            return true;
        }
    }
    is_expired(entry, now, config)
}

pub(crate) fn spawn<K, V, S>(
    rx: Receiver<Op<K, V>>,
    segments: Arc<[Segment<K, V, S>]>,
    hash_builder: S,
    config: Arc<CacheConfig<K, V>>,
    totals: Arc<Totals>,
) -> std::thread::JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    std::thread::Builder::new()
        .name("segcache-coordinator".to_string())
        .spawn(move || run(rx, segments, hash_builder, config, totals))
        .expect("failed to spawn segcache coordinator thread")
}

fn run<K, V, S>(
    rx: Receiver<Op<K, V>>,
    segments: Arc<[Segment<K, V, S>]>,
    hash_builder: S,
    config: Arc<CacheConfig<K, V>>,
    totals: Arc<Totals>,
) where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    let mut list: List<Arc<CacheEntry<K, V>>> = List::new();

    while let Ok(op) = rx.recv() {
        match op {
            Op::LinkAtHead(entry) => {
                tracing::trace!("coordinator: link_at_head");
                link_at_head(&mut list, &entry, &config, &totals);
            }
            Op::RelinkAtHead(entry) => {
                tracing::trace!("coordinator: relink_at_head");
                relink_at_head(&mut list, &entry);
            }
            Op::Delete(entry, cause) => {
                tracing::debug!(?cause, "coordinator: delete");
                if unlink(&mut list, &entry, &config, &totals) {
                    notify(&config, &entry, cause);
                }
            }
            Op::Evict(now) => {
                evict(&mut list, &segments, &hash_builder, &config, &totals, now);
            }
            Op::InvalidateAll(barrier) => {
                tracing::debug!("coordinator: invalidate_all");
                invalidate_all(&mut list, &segments, &config, &totals);
                barrier.signal();
            }
            Op::Barrier(barrier) => {
                barrier.signal();
            }
            Op::Snapshot(tx) => {
                let _ = tx.send(snapshot(&mut list));
            }
        }
    }
}

fn link_at_head<K, V>(
    list: &mut List<Arc<CacheEntry<K, V>>>,
    entry: &Arc<CacheEntry<K, V>>,
    config: &CacheConfig<K, V>,
    totals: &Totals,
) {
    debug_assert_eq!(entry.state(), EntryState::New);
    let ptr = list.push_front(Arc::clone(entry));
    // SAFETY: runs on the coordinator thread, the sole owner of `node`.
    unsafe {
        entry.set_node(ptr);
    }
    entry.set_state(EntryState::Existing);
    totals.count.fetch_add(1, Ordering::Relaxed);
    totals
        .weight
        .fetch_add((config.weigher)(&entry.key, &entry.value), Ordering::Relaxed);
}

fn relink_at_head<K, V>(list: &mut List<Arc<CacheEntry<K, V>>>, entry: &Arc<CacheEntry<K, V>>) {
    if entry.state() != EntryState::Existing {
        return;
    }
    // SAFETY: coordinator thread; `node()` was set by a prior `link_at_head`
    // and the entry is still `Existing`, so it is still in this list.
    unsafe {
        list.move_to_front(entry.node());
    }
}

/// Returns `true` if the entry was actually unlinked (it was `Existing`).
fn unlink<K, V>(
    list: &mut List<Arc<CacheEntry<K, V>>>,
    entry: &Arc<CacheEntry<K, V>>,
    config: &CacheConfig<K, V>,
    totals: &Totals,
) -> bool {
    if entry.state() != EntryState::Existing {
        return false;
    }
    // SAFETY: coordinator thread; entry is `Existing`, so its node is live
    // and still linked into this list.
    unsafe {
        list.unlink(entry.node());
    }
    totals.count.fetch_sub(1, Ordering::Relaxed);
    totals
        .weight
        .fetch_sub((config.weigher)(&entry.key, &entry.value), Ordering::Relaxed);
    entry.set_state(EntryState::Deleted);
    true
}

fn notify<K, V>(config: &CacheConfig<K, V>, entry: &CacheEntry<K, V>, cause: RemovalCause) {
    if let Some(listener) = &config.removal_listener {
        listener(&entry.key, &entry.value, cause);
    }
}

fn evict<K, V, S>(
    list: &mut List<Arc<CacheEntry<K, V>>>,
    segments: &[Segment<K, V, S>],
    hash_builder: &S,
    config: &CacheConfig<K, V>,
    totals: &Totals,
    now: i64,
) where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    loop {
        let Some(tail) = list.peek_back().cloned() else {
            break;
        };
        if !should_prune(&tail, now, config, totals) {
            break;
        }
        let idx = segment_index::<K, K, S>(hash_builder, &tail.key);
        segments[idx].remove(&tail.key);
        unlink(list, &tail, config, totals);
        tracing::debug!("coordinator: evicted an entry");
        notify(config, &tail, RemovalCause::Evicted);
    }
}

fn invalidate_all<K, V, S>(
    list: &mut List<Arc<CacheEntry<K, V>>>,
    segments: &[Segment<K, V, S>],
    config: &CacheConfig<K, V>,
    totals: &Totals,
) where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Default,
{
    let mut guards: Vec<_> = segments.iter().map(|s| s.write_lock()).collect();
    for guard in guards.iter_mut() {
        guard.clear();
    }
    // Release locks in reverse (descending index) order.
    while guards.pop().is_some() {}

    let removed = list.drain_all();
    totals.count.store(0, Ordering::Relaxed);
    totals.weight.store(0, Ordering::Relaxed);
    for entry in removed {
        entry.set_state(EntryState::Deleted);
        notify(config, &entry, RemovalCause::Invalidated);
    }
}

fn snapshot<K: Clone, V: Clone>(list: &mut List<Arc<CacheEntry<K, V>>>) -> Vec<(K, V)> {
    // There is no head-to-tail forward cursor exposed by `List` (only
    // `drain_all`, which is destructive); capture order by draining and
    // immediately relinking, which preserves both contents and order.
    let drained = list.drain_all();
    let out: Vec<(K, V)> = drained
        .iter()
        .map(|e| (e.key.clone(), e.value.clone()))
        .collect();
    for entry in drained.into_iter().rev() {
        let handle = Arc::clone(&entry);
        let ptr = list.push_front(entry);
        // SAFETY: coordinator thread; entry was `Existing` before the drain
        // and is being relinked into the same list with no state change.
        unsafe {
            handle.set_node(ptr);
        }
    }
    out
}
