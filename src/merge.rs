//! Structural three-way merge: rebases a private tree's changes onto a
//! newer committed tree by walking both with synchronized cursors and
//! applying the per-range decision table.

use std::sync::Arc;

use log::trace;

use crate::cursor::Cursor;
use crate::error::{MergeError, MergeResult};
use crate::log::{Range, RangeLog};
use crate::tree::{Node, NodeRef, Tree};
use crate::version::Version;

enum Decision {
    Advance(AdvanceAction),
    Descend,
}

/// What to do to `ptree` before advancing past a range classified as
/// "no further descent needed".
#[derive(Clone, Copy, PartialEq, Eq)]
enum AdvanceAction {
    /// Neither side changed this range (relative to P); leave it alone.
    Keep,
    /// Graft G's current subtree into P at the current position.
    Replace,
    /// G deleted this range since the join and P never touched it; remove
    /// P's (still-present, now-stale) slot rather than grafting anything.
    Delete,
}

/// Rebase `ptree`'s changes onto `gtree`, mutating `ptree` in place.
/// Returns the version `ptree` should be reparented under (`gtree`'s
/// version) on success.
pub fn merge<V: Clone>(
    gtree: &Tree<V>,
    glog: &RangeLog,
    ptree: &mut Tree<V>,
    plog: &RangeLog,
) -> MergeResult<Arc<Version>> {
    let (vj, hpver, gdist, pdist) = Version::join(&gtree.version, &ptree.version)?;
    trace!("merge: join at distance g={gdist} p={pdist}");

    let mut gc = Cursor::new(gtree);
    let mut pc = Cursor::new(ptree);

    while !(gc.end() && pc.end()) {
        Cursor::sync(&mut gc, &mut pc);
        let r = pc.range;
        let decision = classify(glog, plog, &gc, &pc, &vj, gdist, pdist)?;
        let action = match decision {
            Decision::Descend => {
                gc.down();
                pc.down();
                continue;
            }
            Decision::Advance(action) => action,
        };
        match action {
            AdvanceAction::Keep => {}
            AdvanceAction::Replace => {
                do_replace(ptree, gtree.height, &pc, &gc, &vj, pdist)?;
            }
            AdvanceAction::Delete => {
                if !pc.mark_delete(&vj, pdist) {
                    return Err(MergeError::Conflict);
                }
                do_delete(ptree, &pc)?;
            }
        }
        let end = range_high_key(&r);
        gc.advance_past(end);
        pc.advance_past(end);
    }

    Version::rebase_commit(&hpver, &gtree.version);
    Ok(Arc::clone(&gtree.version))
}

fn classify<V: Clone>(
    glog: &RangeLog,
    plog: &RangeLog,
    gc: &Cursor<V>,
    pc: &Cursor<V>,
    vj: &Arc<Version>,
    gdist: u16,
    pdist: u16,
) -> MergeResult<Decision> {
    let r = pc.range;
    let gc_changed = Version::ancestor_strict_limit(vj, &gc.vref(), gdist);
    if !gc_changed {
        // G made no change here since the join point.
        return Ok(Decision::Advance(AdvanceAction::Keep));
    }

    let pc_changed = Version::ancestor_strict_limit(vj, &pc.vref(), pdist);
    if !pc_changed {
        if plog.rs_range_exists(r, 1) {
            return Err(MergeError::Conflict);
        }
        // P never touched this range, so it still holds whatever was here
        // at the join point. If G has since deleted it, the right move is
        // to remove P's now-stale slot, not splice in G's NULL hole's next
        // concrete sibling — that would silently graft an unrelated key's
        // subtree in here (see `Cursor::current`'s NULL-hole behavior).
        if gc.null {
            return Ok(Decision::Advance(AdvanceAction::Delete));
        }
        return Ok(Decision::Advance(AdvanceAction::Replace));
    }

    match (gc.null, pc.null) {
        (true, true) => {
            if plog.rs_range_exists(r, 1) {
                Err(MergeError::Conflict)
            } else {
                Ok(Decision::Advance(AdvanceAction::Keep))
            }
        }
        (false, true) => {
            if plog.rs_range_exists(r, 1) || plog.ds_range_exists(r, 1) {
                Err(MergeError::Conflict)
            } else {
                Ok(Decision::Advance(AdvanceAction::Replace))
            }
        }
        (true, false) => {
            if !glog.ds_range_exists(r, 1) && !plog.rs_range_exists(r, 1) {
                Ok(Decision::Advance(AdvanceAction::Keep))
            } else if r.len == 1 && !plog.rs_key_exists(r.key, 1) {
                Ok(Decision::Advance(AdvanceAction::Keep))
            } else {
                Err(MergeError::Conflict)
            }
        }
        (false, false) => {
            if r.len == 1 {
                if plog.rs_key_exists(r.key, 1) {
                    Err(MergeError::Conflict)
                } else {
                    Ok(Decision::Advance(AdvanceAction::Keep))
                }
            } else {
                Ok(Decision::Descend)
            }
        }
    }
}

fn range_high_key(r: &Range) -> u64 {
    r.key.saturating_add(r.len).saturating_sub(1)
}

/// Graft `gc`'s current subtree into `ptree` at `pc`'s current position.
fn do_replace<V: Clone>(
    ptree: &mut Tree<V>,
    gtree_height: usize,
    pc: &Cursor<V>,
    gc: &Cursor<V>,
    vj: &Arc<Version>,
    p_dist: u16,
) -> MergeResult<()> {
    let Some((parent, slot)) = pc.parent() else {
        // Replacing the whole tree: no parent to check mutability on.
        let replacement = gc.current().expect("replace requires a live G position");
        ptree.root = Some(match replacement {
            NodeRef::Node(n) => n,
            NodeRef::Leaf(_) => unreachable!("root is always a node"),
        });
        ptree.height = gtree_height;
        return Ok(());
    };

    // A NULL hole has no slot of its own to overwrite — P's parent has no
    // child covering that range yet — so filling it is an insertion, not
    // an overwrite. An overwrite (replacing an existing concrete subtree,
    // e.g. a stale copy of the same key range) is the rightmost-slot
    // cascade case the source refuses.
    if !pc.null && *slot == parent.slots.len() - 1 {
        return Err(MergeError::ReplaceRightmost);
    }

    let g_height = gc.height(gtree_height);
    let p_height = pc.height(ptree.height);
    if g_height > p_height {
        return Err(MergeError::ReplaceTooTall);
    }

    let key = range_high_key(&pc.range);
    let mut replacement = gc.current().expect("replace requires a live G position");
    for _ in g_height..p_height {
        replacement = NodeRef::Node(Arc::new(Node {
            version: Arc::clone(&ptree.version),
            slots: vec![(key, replacement)],
        }));
    }

    let spliced = splice_path(pc.path(), replacement, key, pc.null, &ptree.version);
    ptree.root = Some(match spliced {
        NodeRef::Node(n) => n,
        NodeRef::Leaf(_) => unreachable!("root is always a node"),
    });
    Ok(())
}

/// Remove `pc`'s current slot from `ptree`: G deleted this range since the
/// join and P's own copy, untouched since then, is now stale. A no-op if
/// `pc` is already a NULL hole (nothing there to remove).
fn do_delete<V: Clone>(ptree: &mut Tree<V>, pc: &Cursor<V>) -> MergeResult<()> {
    debug_assert!(pc.deleteme, "do_delete requires a prior successful mark_delete");
    if pc.null {
        return Ok(());
    }
    if pc.parent().is_none() {
        ptree.root = None;
        ptree.height = 0;
        return Ok(());
    }

    let mut root = match splice_path_delete(pc.path(), &ptree.version) {
        Some(NodeRef::Node(n)) => n,
        Some(NodeRef::Leaf(_)) => unreachable!("root is always a node"),
        None => {
            ptree.root = None;
            ptree.height = 0;
            return Ok(());
        }
    };
    loop {
        if root.slots.is_empty() {
            ptree.root = None;
            ptree.height = 0;
            return Ok(());
        }
        if root.slots.len() == 1 {
            if let NodeRef::Node(child) = &root.slots[0].1 {
                root = Arc::clone(child);
                ptree.height -= 1;
                continue;
            }
        }
        break;
    }
    ptree.root = Some(root);
    Ok(())
}

/// Remove `path`'s deepest slot and rebuild every ancestor above it with
/// its own slot's key/child updated to match, collapsing any ancestor left
/// with zero slots by letting the removal cascade one level further up.
/// Returns `None` if the whole root collapses away.
fn splice_path_delete<V: Clone>(
    path: &[(Arc<Node<V>>, usize)],
    version: &Arc<Version>,
) -> Option<NodeRef<V>> {
    let mut replacement: Option<NodeRef<V>> = None;
    let mut first = true;
    for (node, slot) in path.iter().rev() {
        let mut slots = node.slots.clone();
        if first {
            slots.remove(*slot);
        } else {
            match replacement.take() {
                Some(r) => {
                    let hk = match &r {
                        NodeRef::Node(n) => n.high_key(),
                        NodeRef::Leaf(_) => unreachable!("siblings at a level share a type"),
                    };
                    slots[*slot] = (hk, r);
                }
                None => slots.remove(*slot),
            }
        }
        first = false;
        if slots.is_empty() {
            replacement = None;
            continue;
        }
        replacement = Some(NodeRef::Node(Arc::new(Node {
            version: Arc::clone(version),
            slots,
        })));
    }
    replacement
}

/// Rebuild every ancestor on `path` (deepest first) with its chosen slot
/// pointed at `replacement`, returning the new root-level `NodeRef`. The
/// deepest level either overwrites an existing slot (`insert_new ==
/// false`, `pc` was pointed at a real, now-stale subtree) or inserts a
/// fresh one before it (`insert_new == true`, `pc` was at a NULL hole
/// with nothing there yet); every ancestor above is always an overwrite,
/// since the child count on that edge never changes.
fn splice_path<V: Clone>(
    path: &[(Arc<Node<V>>, usize)],
    mut replacement: NodeRef<V>,
    mut replacement_key: u64,
    insert_new: bool,
    version: &Arc<Version>,
) -> NodeRef<V> {
    let mut first = true;
    for (node, slot) in path.iter().rev() {
        let mut slots = node.slots.clone();
        if first && insert_new {
            slots.insert(*slot, (replacement_key, replacement));
        } else {
            slots[*slot] = (replacement_key, replacement);
        }
        first = false;
        let new_node = Arc::new(Node {
            version: Arc::clone(version),
            slots,
        });
        replacement_key = new_node.high_key();
        replacement = NodeRef::Node(new_node);
    }
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    fn committed_tree(keys: &[u64]) -> (Tree<u64>, Arc<RangeLog>) {
        let mut t = Tree::create();
        let log = RangeLog::new();
        log.start();
        for &k in keys {
            t.insert(k, k);
            log.log_write(k);
        }
        log.finalize();
        (t, log)
    }

    #[test]
    fn disjoint_writes_merge_cleanly() {
        crate::init_logging();
        let (g, _glog) = committed_tree(&[1, 2, 3]);

        let mut p = g.branch();
        let plog = RangeLog::branch(&_glog);
        p.insert(100, 100);
        plog.log_write(100);

        let mut g2 = g.try_clone();
        g2.version = Version::branch(&g.version);
        g2.insert(4, 4);
        let g2log = RangeLog::branch(&_glog);
        g2log.log_write(4);
        g2log.finalize();

        let result = merge(&g2, &g2log, &mut p, &plog);
        assert!(result.is_ok(), "disjoint writes should not conflict");
        assert_eq!(p.get(4), Some(4));
        assert_eq!(p.get(100), Some(100));
        for k in 1..=3u64 {
            assert_eq!(p.get(k), Some(k));
        }
    }

    #[test]
    fn deleted_key_untouched_by_private_side_is_removed_not_replaced() {
        crate::init_logging();
        let (g, _glog) = committed_tree(&[1, 2, 3]);

        // P never reads or writes key 2.
        let mut p = g.branch();
        let plog = RangeLog::branch(&_glog);
        p.insert(100, 100);
        plog.log_write(100);

        let mut g2 = g.try_clone();
        g2.version = Version::branch(&g.version);
        g2.delete(2);
        let g2log = RangeLog::branch(&_glog);
        g2log.log_delete(2);
        g2log.finalize();

        let result = merge(&g2, &g2log, &mut p, &plog);
        assert!(result.is_ok(), "an uncontested delete should not conflict");
        assert_eq!(p.get(2), None, "the deleted key must be gone, not replaced by a neighbor's subtree");
        assert_eq!(p.get(1), Some(1));
        assert_eq!(p.get(3), Some(3));
        assert_eq!(p.get(100), Some(100));
    }

    #[test]
    fn conflicting_write_to_same_key_is_rejected() {
        let (g, _glog) = committed_tree(&[1, 2, 3]);

        let mut p = g.branch();
        let plog = RangeLog::branch(&_glog);
        p.get(2);
        plog.log_read(2);
        p.insert(2, 999);
        plog.log_write(2);

        let mut g2 = g.try_clone();
        g2.version = Version::branch(&g.version);
        g2.insert(2, 222);
        let g2log = RangeLog::branch(&_glog);
        g2log.log_write(2);
        g2log.finalize();

        let result = merge(&g2, &g2log, &mut p, &plog);
        assert_eq!(result, Err(MergeError::Conflict));
    }
}
