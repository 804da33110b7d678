//! Correctness Tests for the Segmented Cache
//!
//! Validates the scenarios named in spec.md's TESTABLE PROPERTIES section
//! (S1-S4, S7): basic hit/miss accounting, replacement notifications,
//! weight-based eviction, and expiry.

use segcache::{Cache, CacheConfig, RemovalCause};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// S1 — Basic miss/hit.
#[test]
fn basic_miss_then_hit_updates_stats() {
    let cache: Cache<String, i32> = Cache::new(CacheConfig::new());

    assert_eq!(cache.get("a"), None);
    cache.put("a".to_string(), 1);
    assert_eq!(cache.get("a"), Some(1));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.evictions, 0);
}

// S2 — Replacement.
#[test]
fn replacement_fires_exactly_one_replaced_notification() {
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notifications);
    let config = CacheConfig::new().with_removal_listener(move |k: &String, v: &i32, cause| {
        sink.lock().unwrap().push((k.clone(), *v, cause));
    });
    let cache: Cache<String, i32> = Cache::new(config);

    cache.put("a".to_string(), 1);
    cache.put("a".to_string(), 2);
    cache.refresh();

    assert_eq!(cache.get("a"), Some(2));
    let seen = notifications.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], ("a".to_string(), 1, RemovalCause::Replaced));
}

// S3 — Weight-based eviction.
#[test]
fn weight_eviction_keeps_a_fixed_budget() {
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    let config = CacheConfig::new()
        .with_maximum_weight(2)
        .with_removal_listener(move |k: &String, _v: &i32, cause| {
            if cause == RemovalCause::Evicted {
                sink.lock().unwrap().push(k.clone());
            }
        });
    let cache: Cache<String, i32> = Cache::new(config);

    cache.put("a".to_string(), 1);
    cache.put("b".to_string(), 2);
    cache.put("c".to_string(), 3);
    cache.refresh();

    assert_eq!(cache.count(), 2);
    assert_eq!(evicted.lock().unwrap().as_slice(), ["a"]);
}

// S4 — Expiry.
#[test]
fn write_expiry_hides_and_then_evicts_a_stale_entry() {
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    let config: CacheConfig<String, i32> = CacheConfig::new()
        .with_expire_after_write(Duration::from_millis(1))
        .with_removal_listener(move |k: &String, _v: &i32, cause| {
            if cause == RemovalCause::Evicted {
                sink.lock().unwrap().push(k.clone());
            }
        });
    let cache = Cache::new(config);

    cache.put("a".to_string(), 1);
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(cache.get("a"), None);
    cache.refresh();
    assert_eq!(cache.count(), 0);
    assert_eq!(evicted.lock().unwrap().as_slice(), ["a"]);
}

// Access expiry must actually expire: `get` has to check it against the
// pre-touch access time, or a hit would perpetually refresh the entry.
#[test]
fn access_expiry_hides_an_entry_that_has_not_been_touched_in_time() {
    let config: CacheConfig<String, i32> =
        CacheConfig::new().with_expire_after_access(Duration::from_millis(1));
    let cache = Cache::new(config);

    cache.put("a".to_string(), 1);
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(cache.get("a"), None);
}

// S7 — Invalidate-all.
#[test]
fn invalidate_all_notifies_every_live_entry_exactly_once() {
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notifications);
    let config = CacheConfig::new().with_removal_listener(move |k: &String, _v: &i32, cause| {
        if cause == RemovalCause::Invalidated {
            sink.lock().unwrap().push(k.clone());
        }
    });
    let cache: Cache<String, i32> = Cache::new(config);

    for key in ["a", "b", "c"] {
        cache.put(key.to_string(), 1);
    }
    cache.refresh();
    assert_eq!(cache.count(), 3);

    cache.invalidate_all();

    assert_eq!(cache.count(), 0);
    assert_eq!(cache.weight(), 0);
    let mut seen = notifications.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
}

#[test]
fn invalidate_removes_a_single_key_and_notifies_once() {
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notifications);
    let config = CacheConfig::new().with_removal_listener(move |k: &String, _v: &i32, cause| {
        sink.lock().unwrap().push((k.clone(), cause));
    });
    let cache: Cache<String, i32> = Cache::new(config);

    cache.put("a".to_string(), 1);
    cache.put("b".to_string(), 2);
    cache.invalidate("a");

    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.get("b"), Some(2));
    let seen = notifications.lock().unwrap();
    assert_eq!(seen.as_slice(), [("a".to_string(), RemovalCause::Invalidated)]);
}

#[test]
fn stats_are_monotonic_across_mixed_operations() {
    let cache: Cache<String, i32> = Cache::new(CacheConfig::new());

    cache.put("a".to_string(), 1);
    cache.get("a");
    cache.get("missing");
    let first = cache.stats();

    cache.put("b".to_string(), 2);
    cache.get("a");
    cache.invalidate("b");
    let second = cache.stats();

    assert!(second.hits >= first.hits);
    assert!(second.misses >= first.misses);
    assert!(second.evictions >= first.evictions);
}

// A key that has expired must be reloaded by `compute_if_absent`, not
// handed out as a stale value to whichever caller becomes its "follower".
#[test]
fn compute_if_absent_reloads_after_expiry_instead_of_returning_a_stale_value() {
    let config: CacheConfig<String, i32> =
        CacheConfig::new().with_expire_after_write(Duration::from_millis(1));
    let cache = Cache::new(config);
    let invocations = Arc::new(AtomicU32::new(0));

    let load = |invocations: Arc<AtomicU32>| {
        cache.compute_if_absent("a".to_string(), move || {
            let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<_, std::convert::Infallible>(Some(n as i32))
        })
    };

    assert_eq!(load(Arc::clone(&invocations)).unwrap(), 1);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(load(Arc::clone(&invocations)).unwrap(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[test]
fn keys_and_values_reflect_promotion_order() {
    let cache: Cache<String, i32> = Cache::new(CacheConfig::new());
    cache.put("a".to_string(), 1);
    cache.put("b".to_string(), 2);
    cache.put("c".to_string(), 3);
    cache.refresh();

    // "a" is promoted back to the head by a fresh `get`.
    cache.get("a");
    cache.refresh();

    let keys = cache.keys();
    assert_eq!(keys.first(), Some(&"a".to_string()));
    assert_eq!(keys.len(), 3);
}
