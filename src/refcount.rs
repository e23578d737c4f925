//! Mutex-protected reference count with a release callback.
//!
//! Most owning edges in this crate (version→parent, node→children) are
//! ordinary [`std::sync::Arc`] clones, whose atomic strong count already
//! gives a linearizable inc/dec with the `Drop` impl standing in for the
//! release callback. `RefCount` exists as a first-class, independently
//! testable primitive for the one property the spec calls out on its own
//! (refcount soundness), and for the debug-only child-count used for
//! branch detection in [`crate::version`].

use parking_lot::Mutex;

/// A locked counter that runs a release callback exactly once, when the
/// count transitions to zero.
pub struct RefCount {
    count: Mutex<u32>,
}

impl RefCount {
    pub fn new(initial: u32) -> Self {
        RefCount {
            count: Mutex::new(initial),
        }
    }

    /// Increment the count. Panics if the count was already zero: a
    /// reference can only be taken from something already alive.
    pub fn inc(&self) {
        let mut guard = self.count.lock();
        assert!(*guard > 0, "inc on a released RefCount");
        *guard += 1;
    }

    /// Decrement the count. If it reaches zero, `release` is invoked while
    /// still holding the lock (the object is being destroyed and must not
    /// observe concurrent inc/dec mid-teardown), and this returns `true`.
    pub fn dec(&self, release: impl FnOnce()) -> bool {
        let mut guard = self.count.lock();
        assert!(*guard > 0, "dec on an already-released RefCount");
        *guard -= 1;
        if *guard == 0 {
            release();
            true
        } else {
            false
        }
    }

    /// Non-blocking read of the current count. Callers must tolerate a
    /// value that is stale the instant it is returned.
    pub fn try_get(&self) -> u32 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn releases_exactly_once_at_zero() {
        let rc = RefCount::new(2);
        let released = AtomicBool::new(false);
        assert!(!rc.dec(|| released.store(true, Ordering::SeqCst)));
        assert!(!released.load(Ordering::SeqCst));
        assert!(rc.dec(|| released.store(true, Ordering::SeqCst)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "dec on an already-released")]
    fn dec_below_zero_panics() {
        let rc = RefCount::new(1);
        rc.dec(|| {});
        rc.dec(|| {});
    }

    #[test]
    fn try_get_reflects_inc_dec() {
        let rc = RefCount::new(1);
        rc.inc();
        assert_eq!(rc.try_get(), 2);
        rc.dec(|| {});
        assert_eq!(rc.try_get(), 1);
    }
}
