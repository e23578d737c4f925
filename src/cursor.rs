//! Tree-walk cursor: a partially-descended path paired with the
//! key-range the current position covers, modeling holes in the
//! keyspace as explicit NULL ranges.

use std::sync::Arc;

use crate::config::KEY_MAX;
use crate::log::Range;
use crate::tree::{Node, NodeRef, Tree};
use crate::version::Version;

/// One step of a descended path: the node visited, and which of its
/// slots is the current position.
type PathEntry<V> = (Arc<Node<V>>, usize);

pub struct Cursor<V> {
    root: Option<Arc<Node<V>>>,
    tree_version: Arc<Version>,
    path: Vec<PathEntry<V>>,
    pub range: Range,
    pub null: bool,
    pub null_maxkey: u64,
    pub deleteme: bool,
}

impl<V: Clone> Cursor<V> {
    pub fn new(tree: &Tree<V>) -> Self {
        let mut cur = Cursor {
            root: tree.root.clone(),
            tree_version: Arc::clone(&tree.version),
            path: Vec::new(),
            range: Range { key: 0, len: KEY_MAX },
            null: false,
            null_maxkey: 0,
            deleteme: false,
        };
        if cur.root.is_none() {
            cur.null = true;
            cur.null_maxkey = KEY_MAX;
        }
        cur
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// The version governing the current range: the version of the
    /// current position's subtree, or — for a NULL range — the nearest
    /// enclosing node's version, since the hole's appearance cannot be
    /// attributed more precisely than that.
    pub fn vref(&self) -> Arc<Version> {
        if self.null {
            return match self.path.last() {
                Some((node, _)) => Arc::clone(&node.version),
                None => Arc::clone(&self.tree_version),
            };
        }
        match self.current() {
            Some(nr) => Arc::clone(nr.version()),
            None => Arc::clone(&self.tree_version),
        }
    }

    pub(crate) fn current(&self) -> Option<NodeRef<V>> {
        match self.path.last() {
            None => self.root.clone().map(NodeRef::Node),
            Some((node, slot)) => Some(node.slots[*slot].1.clone()),
        }
    }

    pub fn is_leaf_position(&self) -> bool {
        !self.null && matches!(self.current(), Some(NodeRef::Leaf(_)))
    }

    /// Descend into the current position's first slot, narrowing the
    /// range. Requires a non-NULL, non-leaf current position.
    pub fn down(&mut self) {
        assert!(!self.null, "down on a NULL range");
        let node = match self.current().expect("down past the end") {
            NodeRef::Node(n) => n,
            NodeRef::Leaf(_) => panic!("down on a leaf position"),
        };
        let start = self.range.key;
        let (first_key, first_child) = node.slots[0].clone();
        self.path.push((node, 0));
        if matches!(first_child, NodeRef::Leaf(_)) && first_key > start {
            self.null = true;
            self.null_maxkey = first_key - 1;
            self.range = Range {
                key: start,
                len: (first_key - 1).saturating_sub(start) + 1,
            };
        } else {
            self.null = false;
            self.range = Range {
                key: start,
                len: first_key.saturating_sub(start) + 1,
            };
        }
    }

    /// Descend repeatedly until the current range no longer strictly
    /// contains `target`.
    pub fn downrange(&mut self, target: Range) {
        loop {
            if self.null {
                self.range = target;
                return;
            }
            if range_strictly_contains(&self.range, &target) && !self.is_leaf_position() {
                self.down();
            } else {
                return;
            }
        }
    }

    /// Advance to the next sibling range.
    pub fn next(&mut self) {
        self.deleteme = false;
        let resume_at = self.range.key.saturating_add(self.range.len);
        loop {
            let Some((node, slot)) = self.path.last().cloned() else {
                self.null = true;
                self.null_maxkey = KEY_MAX;
                self.range = Range {
                    key: resume_at.min(KEY_MAX),
                    len: KEY_MAX.saturating_sub(resume_at) + 1,
                };
                return;
            };
            if self.null {
                let slot_key = node.slots[slot].0;
                if self.null_maxkey < slot_key {
                    self.null = false;
                    self.range = Range {
                        key: self.null_maxkey + 1,
                        len: slot_key - (self.null_maxkey + 1) + 1,
                    };
                    return;
                }
            }
            if slot + 1 < node.slots.len() {
                let prev_key = node.slots[slot].0;
                let (next_key, next_child) = node.slots[slot + 1].clone();
                self.path.last_mut().unwrap().1 = slot + 1;
                let start = prev_key + 1;
                if matches!(next_child, NodeRef::Leaf(_)) && next_key > start {
                    self.null = true;
                    self.null_maxkey = next_key - 1;
                    self.range = Range {
                        key: start,
                        len: (next_key - 1).saturating_sub(start) + 1,
                    };
                } else {
                    self.null = false;
                    self.range = Range {
                        key: start,
                        len: next_key - start + 1,
                    };
                }
                return;
            }
            self.path.pop();
        }
    }

    /// Consume this cursor's range up to and including `end_key`. If the
    /// current position is a NULL hole extending past `end_key`, this is
    /// a pure bookkeeping truncation (no structural movement); otherwise
    /// it is a real [`Cursor::next`].
    pub fn advance_past(&mut self, end_key: u64) {
        if self.null && self.null_maxkey > end_key {
            self.range = Range {
                key: end_key + 1,
                len: self.null_maxkey - end_key,
            };
            return;
        }
        self.next();
    }

    pub fn end(&self) -> bool {
        self.path.is_empty() && self.null && self.null_maxkey == KEY_MAX
    }

    /// `tree.height - path.len()`: how many node-levels remain below the
    /// current position.
    pub fn height(&self, tree_height: usize) -> usize {
        tree_height.saturating_sub(self.path.len())
    }

    /// The direct parent node of the current position and the slot
    /// index within it, if any (`None` at the root, i.e. `path` empty).
    pub fn parent(&self) -> Option<&PathEntry<V>> {
        self.path.last()
    }

    pub(crate) fn path(&self) -> &[PathEntry<V>] {
        &self.path
    }

    /// Check the mark-delete preconditions for removing the current
    /// position and, if they hold, set `deleteme` and return `true`. The
    /// caller (the merge engine's `do_delete`) is then responsible for
    /// actually splicing the slot out; this only gates whether that's
    /// safe, it does not perform it. Refuses unless the parent's version
    /// is within `p_dist` ancestor-steps of `jv` (this parent was already
    /// part of the join, not created fresher by some other write), the
    /// parent has more than one slot, and the slot is not the rightmost
    /// (that would need a high-key cascade).
    pub fn mark_delete(&mut self, jv: &Arc<Version>, p_dist: u16) -> bool {
        let Some((node, slot)) = self.path.last() else {
            return false;
        };
        if !Version::ancestor_strict_limit(jv, &node.version, p_dist) {
            return false;
        }
        if node.slots.len() <= 1 {
            return false;
        }
        if *slot == node.slots.len() - 1 {
            return false;
        }
        self.deleteme = true;
        true
    }

    /// Align two cursors to the same synchronized range.
    pub fn sync(a: &mut Cursor<V>, b: &mut Cursor<V>) {
        loop {
            if a.range == b.range {
                return;
            }
            if range_strictly_contains(&a.range, &b.range) {
                if a.null {
                    a.range = b.range;
                    return;
                }
                a.down();
            } else if range_strictly_contains(&b.range, &a.range) {
                if b.null {
                    b.range = a.range;
                    return;
                }
                b.down();
            } else {
                return;
            }
        }
    }
}

fn range_strictly_contains(outer: &Range, inner: &Range) -> bool {
    if outer == inner {
        return false;
    }
    outer_contains(outer, inner)
}

fn outer_contains(outer: &Range, inner: &Range) -> bool {
    if inner.is_empty() {
        return true;
    }
    let inner_end = inner.key.saturating_add(inner.len).saturating_sub(1);
    let outer_end = outer.key.saturating_add(outer.len).saturating_sub(1);
    outer.key <= inner.key && inner_end <= outer_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: &[u64]) -> Tree<u64> {
        let mut t = Tree::create();
        for &k in keys {
            t.insert(k, k);
        }
        t
    }

    #[test]
    fn cursor_covers_whole_keyspace_disjointly() {
        let t = build(&[5, 10, 20]);
        let mut cur = Cursor::new(&t);
        cur.down();
        let mut prev_end: Option<u64> = None;
        let mut steps = 0;
        loop {
            if cur.end() {
                break;
            }
            let start = cur.range.key;
            if let Some(pe) = prev_end {
                assert_eq!(start, pe + 1, "ranges must be contiguous");
            } else {
                assert_eq!(start, 0);
            }
            prev_end = Some(cur.range.key + cur.range.len - 1);
            cur.next();
            steps += 1;
            assert!(steps < 1000, "cursor did not terminate");
        }
        assert_eq!(prev_end, Some(KEY_MAX));
    }

    #[test]
    fn empty_tree_cursor_is_immediately_at_end() {
        let t: Tree<u64> = Tree::create();
        let cur = Cursor::new(&t);
        assert!(cur.end());
    }
}
