//! The version DAG: parent-linked version handles, branch, join,
//! ancestor queries, pinning and chain GC.
//!
//! A version is represented as `Arc<Version>`; pointer identity
//! (`Arc::ptr_eq`) stands in for the source's "pointer identity is version
//! identity" invariant, and `Arc`'s own atomic strong count realizes the
//! refcount primitive for this particular owning edge (see
//! [`crate::refcount`] for the standalone, independently testable version
//! of the same primitive).

use parking_lot::Mutex;
use std::sync::Arc;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::JOIN_LIMIT;
use crate::error::{MergeError, MergeResult};

#[cfg(debug_assertions)]
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A node in the version DAG.
pub struct Version {
    parent: Mutex<Option<Arc<Version>>>,
    #[cfg(debug_assertions)]
    children: AtomicU32,
    #[cfg(debug_assertions)]
    id: u64,
}

impl Version {
    /// Create a parentless root version.
    pub fn create() -> Arc<Version> {
        Arc::new(Version {
            parent: Mutex::new(None),
            #[cfg(debug_assertions)]
            children: AtomicU32::new(0),
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Fork a new version whose parent is `parent`.
    pub fn branch(parent: &Arc<Version>) -> Arc<Version> {
        #[cfg(debug_assertions)]
        parent.children.fetch_add(1, Ordering::Relaxed);
        Arc::new(Version {
            parent: Mutex::new(Some(Arc::clone(parent))),
            #[cfg(debug_assertions)]
            children: AtomicU32::new(0),
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn parent(&self) -> Option<Arc<Version>> {
        self.parent.lock().clone()
    }

    /// Pointer-identity equality.
    pub fn eq(a: &Arc<Version>, b: &Arc<Version>) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// Is `a` an ancestor of `b`, inclusive of `b == a`?
    pub fn ancestor(a: &Arc<Version>, b: &Arc<Version>) -> bool {
        let mut v = Arc::clone(b);
        loop {
            if Version::eq(a, &v) {
                return true;
            }
            match v.parent() {
                Some(p) => v = p,
                None => return false,
            }
        }
    }

    /// Bounded variant of [`Version::ancestor`]: walks at most `max_distance`
    /// parent-steps from `b`.
    pub fn ancestor_limit(a: &Arc<Version>, b: &Arc<Version>, max_distance: u16) -> bool {
        let mut v = Arc::clone(b);
        let mut steps = 0u16;
        loop {
            if Version::eq(a, &v) {
                return true;
            }
            if steps >= max_distance {
                return false;
            }
            match v.parent() {
                Some(p) => {
                    v = p;
                    steps += 1;
                }
                None => return false,
            }
        }
    }

    /// Like [`Version::ancestor_limit`] but excludes `b == a`.
    pub fn ancestor_strict_limit(a: &Arc<Version>, b: &Arc<Version>, max_distance: u16) -> bool {
        match b.parent() {
            Some(p) => Version::ancestor_limit(a, &p, max_distance.saturating_sub(1)),
            None => false,
        }
    }

    /// Find the nearest common ancestor of `gver` and `pver`.
    ///
    /// Returns `(vj, hpver, gdist, pdist)`: `vj` is the join point, `hpver`
    /// is the child of `vj` on the path toward `pver`, and `gdist`/`pdist`
    /// are the number of parent-steps from `gver`/`pver` to `vj`.
    pub fn join(
        gver: &Arc<Version>,
        pver: &Arc<Version>,
    ) -> MergeResult<(Arc<Version>, Arc<Version>, u16, u16)> {
        // Fast path: the common case where both versions branched directly
        // from the same parent.
        if let (Some(gp), Some(pp)) = (gver.parent(), pver.parent()) {
            if Version::eq(&gp, &pp) {
                return Ok((gp, Arc::clone(pver), 1, 1));
            }
        }
        Self::join_slow(gver, pver)
    }

    fn join_slow(
        gver: &Arc<Version>,
        pver: &Arc<Version>,
    ) -> MergeResult<(Arc<Version>, Arc<Version>, u16, u16)> {
        let mut gv = Arc::clone(gver);
        for gi in 0..JOIN_LIMIT {
            let mut pv = Arc::clone(pver);
            for pi in 0..JOIN_LIMIT {
                if let (Some(gp), Some(pp)) = (gv.parent(), pv.parent()) {
                    if Version::eq(&gp, &pp) {
                        return Ok((gp, pv, gi + 1, pi + 1));
                    }
                }
                match pv.parent() {
                    Some(p) => pv = p,
                    None => break,
                }
            }
            match gv.parent() {
                Some(p) => gv = p,
                None => break,
            }
        }
        Err(MergeError::JoinFailed)
    }

    /// Debug-only branch detection: true if any version strictly between
    /// `tail` and `head` (inclusive of `tail`) has more than one child.
    #[cfg(debug_assertions)]
    pub fn chain_has_branch(tail: &Arc<Version>, head: &Arc<Version>) -> bool {
        let mut v = Arc::clone(tail);
        loop {
            if v.children.load(Ordering::Relaxed) > 1 {
                return true;
            }
            if Version::eq(&v, head) {
                return false;
            }
            v = v.parent().expect("chain_has_branch: head not found in chain");
        }
    }

    /// Reparent `ver` onto `new_parent`, adjusting child counts.
    fn set_parent(ver: &Arc<Version>, new_parent: &Arc<Version>) {
        #[cfg(debug_assertions)]
        {
            if let Some(old) = ver.parent() {
                old.children.fetch_sub(1, Ordering::Relaxed);
            }
            new_parent.children.fetch_add(1, Ordering::Relaxed);
        }
        *ver.parent.lock() = Some(Arc::clone(new_parent));
    }

    /// Mark intent to reparent the chain ending at `hpver` under `v`. This
    /// rewrite keeps `v` alive via the caller's own `Arc` handle, so the
    /// two-phase protocol collapses to a no-op placeholder kept for
    /// symmetry with the commit/merge control flow (see DESIGN.md).
    pub fn rebase_prepare(_v: &Arc<Version>) {}

    /// Swap `hpver`'s parent from the old join ancestor to `new_parent`
    /// (typically `gver`), completing a successful merge's rebase.
    pub fn rebase_commit(hpver: &Arc<Version>, new_parent: &Arc<Version>) {
        Version::set_parent(hpver, new_parent);
    }

    /// Undo a `rebase_prepare`. A no-op in this rewrite; see
    /// [`Version::rebase_prepare`].
    pub fn rebase_abort(_v: &Arc<Version>) {}

    /// Best-effort chain garbage collection: starting from `start`'s
    /// parent chain, splice out any ancestor that is reachable only
    /// through this one child link.
    ///
    /// Because ownership here is ordinary `Arc` reference counting, "only
    /// reachable through this link" is approximated as a strong count of
    /// 2: one held by the child's `parent` slot, one held by the local
    /// clone taken to inspect it. See DESIGN.md for why this is an
    /// approximation of the source's explicit refcount bookkeeping.
    pub fn gc_chain(start: &Arc<Version>) {
        let mut child = Arc::clone(start);
        loop {
            let candidate = match child.parent() {
                Some(p) => p,
                None => break,
            };
            if Arc::strong_count(&candidate) == 2 {
                let grandparent = candidate.parent();
                #[cfg(debug_assertions)]
                {
                    candidate.children.fetch_sub(1, Ordering::Relaxed);
                    if let Some(ref gp) = grandparent {
                        gp.children.fetch_add(1, Ordering::Relaxed);
                    }
                }
                *child.parent.lock() = grandparent;
                // `candidate` drops here, freeing it.
            } else {
                child = candidate;
            }
        }
    }

    /// Promote `new` to the mtree's committed slot; the returned clone is
    /// the pin itself (an extra `Arc` strong reference).
    pub fn pin(new: &Arc<Version>) -> Arc<Version> {
        Arc::clone(new)
    }

    /// Drop the pin previously taken with [`Version::pin`].
    pub fn unpin(pinned: Arc<Version>) {
        drop(pinned);
    }
}
