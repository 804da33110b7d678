//! Single-flight completion cells.
//!
//! A [`Promise`] is installed into a segment map before a loader runs, so
//! concurrent callers for the same key all observe the same eventual result
//! instead of each invoking the loader. It resolves exactly once, to either
//! a value or a [`CacheError`].

use parking_lot::{Condvar, Mutex};

use crate::error::CacheError;

enum State<T> {
    Pending,
    Ready(T),
    Failed(CacheError),
}

/// A blocking single-flight completion cell.
///
/// The leader (the thread that installed this promise) completes it exactly
/// once, via [`Promise::complete`] or [`Promise::fail`]; every other holder
/// calls [`Promise::wait`] and blocks until that happens.
pub(crate) struct Promise<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T: Clone> Promise<T> {
    pub(crate) fn pending() -> Self {
        Promise {
            state: Mutex::new(State::Pending),
            cond: Condvar::new(),
        }
    }

    /// Builds an already-resolved promise, used by `put` to install a fresh
    /// entry without a load round-trip.
    pub(crate) fn ready(value: T) -> Self {
        Promise {
            state: Mutex::new(State::Ready(value)),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn complete(&self, value: T) {
        let mut guard = self.state.lock();
        *guard = State::Ready(value);
        self.cond.notify_all();
    }

    pub(crate) fn fail(&self, err: CacheError) {
        let mut guard = self.state.lock();
        *guard = State::Failed(err);
        self.cond.notify_all();
    }

    /// Blocks until this promise resolves, then returns its result.
    pub(crate) fn wait(&self) -> Result<T, CacheError> {
        let mut guard = self.state.lock();
        loop {
            match &*guard {
                State::Pending => self.cond.wait(&mut guard),
                State::Ready(v) => return Ok(v.clone()),
                State::Failed(e) => return Err(e.clone()),
            }
        }
    }

    /// Returns the result without blocking, if already resolved.
    pub(crate) fn try_get(&self) -> Option<Result<T, CacheError>> {
        match &*self.state.lock() {
            State::Pending => None,
            State::Ready(v) => Some(Ok(v.clone())),
            State::Failed(e) => Some(Err(e.clone())),
        }
    }

    /// True once this promise has resolved to a failure — a tombstone the
    /// next writer should evict.
    pub(crate) fn is_failed(&self) -> bool {
        matches!(&*self.state.lock(), State::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ready_promise_resolves_immediately() {
        let p = Promise::ready(42);
        assert_eq!(p.wait(), Ok(42));
    }

    #[test]
    fn followers_block_until_leader_completes() {
        let p = Arc::new(Promise::<i32>::pending());
        let p2 = Arc::clone(&p);
        let handle = thread::spawn(move || p2.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        p.complete(7);
        assert_eq!(handle.join().unwrap(), Ok(7));
    }

    #[test]
    fn failure_is_delivered_to_every_follower() {
        let p = Arc::new(Promise::<i32>::pending());
        let followers: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&p);
                thread::spawn(move || p.wait())
            })
            .collect();
        std::thread::sleep(std::time::Duration::from_millis(20));
        p.fail(CacheError::NullLoader);
        assert!(p.is_failed());
        for f in followers {
            assert_eq!(f.join().unwrap(), Err(CacheError::NullLoader));
        }
    }

    #[test]
    fn try_get_is_none_while_pending() {
        let p = Promise::<i32>::pending();
        assert!(p.try_get().is_none());
        p.complete(1);
        assert_eq!(p.try_get(), Some(Ok(1)));
    }
}
