//! The mutable handle: rendezvous point for committing transactions.
//!
//! Holds the currently committed tree and log, guarded by a single
//! `mt_lock`. The source's alternative 3-phase commit protocol guarded by
//! a separate `tx_lock` is not modeled — see DESIGN.md and §9.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::log::RangeLog;
use crate::tree::Tree;
use crate::version::Version;

struct Committed<V> {
    tree: Tree<V>,
    log: Arc<RangeLog>,
}

/// The shared, mutable handle transactions commit against.
pub struct MutableTree<V> {
    inner: Mutex<Committed<V>>,
}

impl<V: Clone> MutableTree<V> {
    pub fn new(initial_tree: Tree<V>) -> Self {
        let log = RangeLog::new();
        log.start();
        MutableTree {
            inner: Mutex::new(Committed {
                tree: initial_tree,
                log,
            }),
        }
    }

    /// A snapshot of the currently committed tree and its log, taken
    /// under `mt_lock`. Cheap: clones an `Arc`-backed structure, not the
    /// structure itself.
    pub fn snapshot(&self) -> (Tree<V>, Arc<RangeLog>) {
        let g = self.inner.lock();
        (g.tree.try_clone(), Arc::clone(&g.log))
    }

    pub fn version(&self) -> Arc<Version> {
        Arc::clone(&self.inner.lock().tree.version)
    }

    /// Install `tree`/`log` as the new committed state iff the handle's
    /// current version is still `expected`. Returns whether the install
    /// happened.
    pub(crate) fn try_install(&self, expected: &Arc<Version>, tree: Tree<V>, log: Arc<RangeLog>) -> bool {
        let mut g = self.inner.lock();
        if !Version::eq(&g.tree.version, expected) {
            return false;
        }
        let old_ver = Arc::clone(&g.tree.version);
        *g = Committed { tree, log };
        // The new version is pinned for as long as it stays `g.tree.version`;
        // `old_ver` was the previous pin, released here.
        Version::unpin(old_ver);
        true
    }
}
