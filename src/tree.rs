//! Versioned copy-on-write B+-tree: COW node splits, delete-time
//! borrow/merge rebalancing, and height shrink/grow.
//!
//! Every structural mutation allocates fresh nodes along the touched
//! path and shares everything else via `Arc` clones, so a branched
//! tree's untouched subtrees remain byte-for-byte identical (and
//! reference-identical) to the tree it branched from. See DESIGN.md for
//! why this rewrite always rebuilds the touched path rather than
//! mutating an already-current-version node in place.

use std::sync::Arc;

use crate::config::NODE_CAPACITY;
use crate::version::Version;

/// A child of an internal node: either another node, or a leaf holding
/// the value for the key recorded in the parent's slot.
pub enum NodeRef<V> {
    Node(Arc<Node<V>>),
    Leaf(Arc<Leaf<V>>),
}

impl<V> Clone for NodeRef<V> {
    fn clone(&self) -> Self {
        match self {
            NodeRef::Node(n) => NodeRef::Node(Arc::clone(n)),
            NodeRef::Leaf(l) => NodeRef::Leaf(Arc::clone(l)),
        }
    }
}

impl<V> NodeRef<V> {
    pub fn version(&self) -> &Arc<Version> {
        match self {
            NodeRef::Node(n) => &n.version,
            NodeRef::Leaf(l) => &l.version,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeRef::Leaf(_))
    }

    /// The maximum key reachable under this subtree. Only defined for
    /// `Node`; a leaf's key lives in the parent's slot, not the leaf
    /// itself, so callers must already know it.
    fn high_key(&self) -> u64 {
        match self {
            NodeRef::Node(n) => n.high_key(),
            NodeRef::Leaf(_) => panic!("a leaf has no intrinsic high key"),
        }
    }
}

/// An internal node: a dense, ascending-by-key array of `(high key,
/// child)` slots.
pub struct Node<V> {
    pub version: Arc<Version>,
    pub slots: Vec<(u64, NodeRef<V>)>,
}

impl<V> Node<V> {
    pub fn items_nr(&self) -> usize {
        self.slots.len()
    }

    pub fn high_key(&self) -> u64 {
        self.slots.last().expect("node has no slots").0
    }

    fn is_full(&self) -> bool {
        self.slots.len() > NODE_CAPACITY
    }

    /// First slot index `i` with `slots[i].0 >= key`, or `slots.len()` if
    /// `key` exceeds the node's high key.
    fn lower_bound(&self, key: u64) -> usize {
        self.slots.partition_point(|(k, _)| *k < key)
    }
}

/// A leaf: the value for one key. The key itself is carried by the
/// parent's slot, not stored redundantly here.
pub struct Leaf<V> {
    pub version: Arc<Version>,
    pub value: V,
}

/// A versioned, copy-on-write B+-tree.
pub struct Tree<V> {
    pub root: Option<Arc<Node<V>>>,
    pub version: Arc<Version>,
    pub height: usize,
}

impl<V: Clone> Tree<V> {
    /// A fresh, empty tree at a fresh root version.
    pub fn create() -> Self {
        Tree {
            root: None,
            version: Version::create(),
            height: 0,
        }
    }

    /// A fresh, empty tree at a caller-supplied version.
    pub fn alloc(version: Arc<Version>) -> Self {
        Tree {
            root: None,
            version,
            height: 0,
        }
    }

    /// Fork a private tree sharing all current structure, under a new
    /// child version. No node is copied by this call; copies happen
    /// lazily as mutations touch paths.
    pub fn branch(&self) -> Self {
        Tree {
            root: self.root.clone(),
            version: Version::branch(&self.version),
            height: self.height,
        }
    }

    /// A shallow, independent handle to the same structure at the same
    /// version (mirrors the source's `tree_copy`).
    pub fn try_clone(&self) -> Self {
        Tree {
            root: self.root.clone(),
            version: Arc::clone(&self.version),
            height: self.height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Read-only lookup; does not allocate or COW anything.
    pub fn get(&self, key: u64) -> Option<V> {
        let mut node = self.root.as_ref()?;
        loop {
            let idx = node.lower_bound(key);
            if idx == node.slots.len() {
                return None;
            }
            let (slot_key, child) = &node.slots[idx];
            match child {
                NodeRef::Leaf(leaf) => {
                    return if *slot_key == key {
                        Some(leaf.value.clone())
                    } else {
                        None
                    };
                }
                NodeRef::Node(n) => node = n,
            }
        }
    }

    /// Insert `value` at `key`, returning the previous value if any.
    pub fn insert(&mut self, key: u64, value: V) -> Option<V> {
        let Some(root) = self.root.take() else {
            let leaf = Arc::new(Leaf {
                version: Arc::clone(&self.version),
                value,
            });
            self.root = Some(Arc::new(Node {
                version: Arc::clone(&self.version),
                slots: vec![(key, NodeRef::Leaf(leaf))],
            }));
            self.height = 1;
            return None;
        };
        match insert_into_node(&root, &self.version, key, value, self.height) {
            InsertStep::Updated(NodeRef::Node(n), old) => {
                self.root = Some(n);
                old
            }
            InsertStep::Updated(NodeRef::Leaf(_), _) => unreachable!("root is always a node"),
            InsertStep::Split(left, left_hk, right, old) => {
                let right_hk = right.high_key();
                self.root = Some(Arc::new(Node {
                    version: Arc::clone(&self.version),
                    slots: vec![(left_hk, left), (right_hk, right)],
                }));
                self.height += 1;
                old
            }
        }
    }

    /// Remove `key`, returning its value if present. May shrink height.
    pub fn delete(&mut self, key: u64) -> Option<V> {
        let root = self.root.as_ref()?;
        let Some((new_root, removed)) = delete_from_node(root, &self.version, key) else {
            return None;
        };
        let mut root = new_root;
        loop {
            if root.slots.is_empty() {
                self.root = None;
                self.height = 0;
                return Some(removed);
            }
            if root.slots.len() == 1 {
                if let NodeRef::Node(child) = &root.slots[0].1 {
                    let child = Arc::clone(child);
                    root = (*child).clone_structural();
                    self.height -= 1;
                    continue;
                }
            }
            break;
        }
        self.root = Some(Arc::new(root));
        Some(removed)
    }
}

// Node needs a cheap "unwrap one level" helper for the root-collapse
// loop above; it clones the slot vector (Arc bumps only).
impl<V> Node<V> {
    fn clone_structural(&self) -> Node<V> {
        Node {
            version: Arc::clone(&self.version),
            slots: self.slots.clone(),
        }
    }
}

enum InsertStep<V> {
    Updated(NodeRef<V>, Option<V>),
    Split(NodeRef<V>, u64, NodeRef<V>, Option<V>),
}

fn finish_insert<V>(slots: Vec<(u64, NodeRef<V>)>, version: &Arc<Version>) -> InsertStep<V> {
    let node = Node {
        version: Arc::clone(version),
        slots,
    };
    if !node.is_full() {
        return InsertStep::Updated(NodeRef::Node(Arc::new(node)), None);
    }
    let mut slots = node.slots;
    let mid = (slots.len() + 1) / 2;
    let right_slots = slots.split_off(mid);
    let left_hk = slots.last().unwrap().0;
    let left = Arc::new(Node {
        version: Arc::clone(version),
        slots,
    });
    let right = Arc::new(Node {
        version: Arc::clone(version),
        slots: right_slots,
    });
    InsertStep::Split(NodeRef::Node(left), left_hk, NodeRef::Node(right), None)
}

/// A freshly built chain of `height` single-slot node wrappers over a new
/// leaf, all keyed at `key` (the chain's only, and therefore maximum, key).
/// `height == 1` yields a single node whose one slot is the leaf itself.
fn build_append_chain<V>(version: &Arc<Version>, height: usize, key: u64, value: V) -> NodeRef<V> {
    let leaf = Arc::new(Leaf {
        version: Arc::clone(version),
        value,
    });
    let mut chain = NodeRef::Leaf(leaf);
    for _ in 0..height {
        chain = NodeRef::Node(Arc::new(Node {
            version: Arc::clone(version),
            slots: vec![(key, chain)],
        }));
    }
    chain
}

fn insert_into_node<V: Clone>(
    node: &Arc<Node<V>>,
    version: &Arc<Version>,
    key: u64,
    value: V,
    height: usize,
) -> InsertStep<V> {
    let len = node.slots.len();
    let idx = node.lower_bound(key);
    let target_idx = if idx < len { idx } else { len - 1 };
    let is_new_key = idx == len || node.slots[idx].0 != key;
    let child_is_leaf = node.slots[target_idx].1.is_leaf();

    if is_new_key && child_is_leaf {
        let mut slots = node.slots.clone();
        let leaf = Arc::new(Leaf {
            version: Arc::clone(version),
            value,
        });
        slots.insert(idx, (key, NodeRef::Leaf(leaf)));
        return finish_insert(slots, version);
    }

    if is_new_key && idx == len {
        // A new rightmost key past the tree's current high key, with an
        // internal node (not a leaf) as the current rightmost child. If
        // that child already belongs to this version it was already
        // privately rebuilt earlier in this same transaction, so bumping
        // it via the ordinary recursive insert below is free; otherwise
        // it's shared with an older version and recursing into it would
        // reallocate the whole path just to append one key at the far
        // right edge. Leave it untouched and graft a fresh single-child
        // chain of matching height beside it instead.
        debug_assert!(height >= 2, "non-leaf child implies height >= 2");
        if let NodeRef::Node(child) = &node.slots[target_idx].1 {
            if !Version::eq(&child.version, version) {
                let mut slots = node.slots.clone();
                let new_subtree = build_append_chain(version, height - 1, key, value);
                slots.push((key, new_subtree));
                return finish_insert(slots, version);
            }
        }
    }

    match &node.slots[target_idx].1 {
        NodeRef::Leaf(leaf) => {
            debug_assert!(!is_new_key);
            let old = leaf.value.clone();
            let mut slots = node.slots.clone();
            slots[target_idx].1 = NodeRef::Leaf(Arc::new(Leaf {
                version: Arc::clone(version),
                value,
            }));
            InsertStep::Updated(
                NodeRef::Node(Arc::new(Node {
                    version: Arc::clone(version),
                    slots,
                })),
                Some(old),
            )
        }
        NodeRef::Node(child) => match insert_into_node(child, version, key, value, height - 1) {
            InsertStep::Updated(new_child, old) => {
                let mut slots = node.slots.clone();
                let new_hk = new_child.high_key();
                slots[target_idx] = (new_hk, new_child);
                InsertStep::Updated(
                    NodeRef::Node(Arc::new(Node {
                        version: Arc::clone(version),
                        slots,
                    })),
                    old,
                )
            }
            InsertStep::Split(left, left_hk, right, old) => {
                let right_hk = right.high_key();
                let mut slots = node.slots.clone();
                slots[target_idx] = (left_hk, left);
                slots.insert(target_idx + 1, (right_hk, right));
                let mut step = finish_insert(slots, version);
                // thread the (always-None from finish_insert, possibly-Some from
                // the recursive call) old value through
                if let InsertStep::Updated(_, ref mut o) | InsertStep::Split(_, _, _, ref mut o) =
                    step
                {
                    *o = old;
                }
                step
            }
        },
    }
}

/// Result of removing a key from a subtree rooted at a node.
struct DeleteDone<V> {
    node: Node<V>,
    removed: V,
}

fn delete_from_node<V: Clone>(
    node: &Arc<Node<V>>,
    version: &Arc<Version>,
    key: u64,
) -> Option<(Node<V>, V)> {
    let len = node.slots.len();
    let idx = node.lower_bound(key);
    if idx == len {
        return None;
    }
    let (slot_key, child) = &node.slots[idx];

    match child {
        NodeRef::Leaf(leaf) => {
            if *slot_key != key {
                return None;
            }
            let removed = leaf.value.clone();
            let mut slots = node.slots.clone();
            slots.remove(idx);
            Some((
                Node {
                    version: Arc::clone(version),
                    slots,
                },
                removed,
            ))
        }
        NodeRef::Node(child_node) => {
            let DeleteDone {
                node: new_child,
                removed,
            } = {
                let (n, r) = delete_from_node(child_node, version, key)?;
                DeleteDone { node: n, removed: r }
            };
            let mut slots = node.slots.clone();
            if new_child.items_nr() >= 2 {
                let hk = new_child.high_key();
                slots[idx] = (hk, NodeRef::Node(Arc::new(new_child)));
            } else {
                rebalance_slot(&mut slots, idx, new_child, version);
            }
            Some((
                Node {
                    version: Arc::clone(version),
                    slots,
                },
                removed,
            ))
        }
    }
}

/// `new_child` (at `slots[idx]`'s position, logically) has fewer than 2
/// items. Borrow from a sibling if one has surplus capacity to spare a
/// redistribution, otherwise merge with it. If no sibling exists (this
/// node has only one child total), the underflowed child is kept as-is
/// and the underflow is left for this node's own parent to resolve —
/// matching the root-only collapse the B+-tree core performs at the top
/// level.
fn rebalance_slot<V: Clone>(
    slots: &mut Vec<(u64, NodeRef<V>)>,
    idx: usize,
    new_child: Node<V>,
    version: &Arc<Version>,
) {
    if slots.len() == 1 {
        let hk = new_child.slots.last().map(|s| s.0).unwrap_or(slots[idx].0);
        slots[idx] = (hk, NodeRef::Node(Arc::new(new_child)));
        return;
    }

    let sibling_idx = if idx > 0 { idx - 1 } else { idx + 1 };
    let sibling = match &slots[sibling_idx].1 {
        NodeRef::Node(n) => n,
        NodeRef::Leaf(_) => unreachable!("siblings at the same level share a type"),
    };

    let (left_slots, right_slots, left_pos) = if sibling_idx < idx {
        (sibling.slots.clone(), new_child.slots, sibling_idx)
    } else {
        (new_child.slots, sibling.slots.clone(), idx)
    };
    let mut combined: Vec<(u64, NodeRef<V>)> = left_slots;
    combined.extend(right_slots);

    if combined.len() <= NODE_CAPACITY {
        let hk = combined.last().unwrap().0;
        let merged = Node {
            version: Arc::clone(version),
            slots: combined,
        };
        slots[left_pos] = (hk, NodeRef::Node(Arc::new(merged)));
        slots.remove(left_pos + 1);
    } else {
        let mid = combined.len() / 2;
        let mut left = combined;
        let right = left.split_off(mid);
        let left_hk = left.last().unwrap().0;
        let right_hk = right.last().unwrap().0;
        let left_node = Node {
            version: Arc::clone(version),
            slots: left,
        };
        let right_node = Node {
            version: Arc::clone(version),
            slots: right,
        };
        slots[left_pos] = (left_hk, NodeRef::Node(Arc::new(left_node)));
        slots[left_pos + 1] = (right_hk, NodeRef::Node(Arc::new(right_node)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_insert_get() {
        let mut t: Tree<u64> = Tree::create();
        assert_eq!(t.insert(42, 100), None);
        assert_eq!(t.get(42), Some(100));
        assert_eq!(t.get(43), None);
    }

    #[test]
    fn insert_overwrite_returns_old() {
        let mut t: Tree<u64> = Tree::create();
        assert_eq!(t.insert(1, 10), None);
        assert_eq!(t.insert(1, 20), Some(10));
        assert_eq!(t.get(1), Some(20));
    }

    #[test]
    fn split_grows_height_and_keeps_all_keys() {
        let mut t: Tree<u64> = Tree::create();
        for k in 0..128u64 {
            t.insert(k, k);
        }
        assert!(t.height >= 2, "height was {}", t.height);
        for k in 0..128u64 {
            assert_eq!(t.get(k), Some(k));
        }
    }

    #[test]
    fn delete_shrinks_and_keeps_remaining_keys() {
        let mut t: Tree<u64> = Tree::create();
        for k in 0..128u64 {
            t.insert(k, k);
        }
        let height_before = t.height;
        for k in 0..64u64 {
            assert_eq!(t.delete(k), Some(k));
        }
        assert!(t.height <= height_before);
        for k in 0..64u64 {
            assert_eq!(t.get(k), None);
        }
        for k in 64..128u64 {
            assert_eq!(t.get(k), Some(k));
        }
    }

    #[test]
    fn branch_preserves_old_version_structure() {
        let mut t0: Tree<u64> = Tree::create();
        for k in 0..64u64 {
            t0.insert(k, k);
        }
        let v0_root = t0.root.clone();
        assert!(
            t0.height >= 2,
            "need an internal rightmost child to exercise the trailing-slot case, height was {}",
            t0.height
        );
        let old_len = t0.root.as_ref().unwrap().slots.len();
        let rightmost_before = match &t0.root.as_ref().unwrap().slots[old_len - 1].1 {
            NodeRef::Node(n) => Arc::clone(n),
            NodeRef::Leaf(_) => panic!("expected an internal rightmost child"),
        };

        let mut t1 = t0.branch();
        t1.insert(1000, 1000);

        // the original tree's root is untouched
        assert!(Arc::ptr_eq(v0_root.as_ref().unwrap(), t0.root.as_ref().unwrap()));
        assert_eq!(t0.get(1000), None);
        assert_eq!(t1.get(1000), Some(1000));
        for k in 0..64u64 {
            assert_eq!(t1.get(k), Some(k));
        }

        // appending past the high key must not reallocate the untouched
        // old rightmost subtree: only a fresh sibling chain is grafted in,
        // one slot past the old rightmost one.
        let new_root = t1.root.as_ref().unwrap();
        assert_eq!(
            new_root.slots.len(),
            old_len + 1,
            "append should add exactly one new slot, not restructure existing ones"
        );
        let rightmost_after = match &new_root.slots[old_len - 1].1 {
            NodeRef::Node(n) => Arc::clone(n),
            NodeRef::Leaf(_) => panic!("expected an internal rightmost child"),
        };
        assert!(
            Arc::ptr_eq(&rightmost_before, &rightmost_after),
            "old rightmost subtree must be untouched, not reallocated"
        );
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let mut t: Tree<u64> = Tree::create();
        t.insert(5, 5);
        assert_eq!(t.delete(6), None);
        assert_eq!(t.get(5), Some(5));
    }

    #[test]
    fn random_insert_delete_sequence_matches_model() {
        use rand::{Rng, SeedableRng};
        use rand_xorshift::XorShiftRng;

        let mut rng = XorShiftRng::seed_from_u64(0xC0FFEE);
        let mut t: Tree<u64> = Tree::create();
        let mut model = std::collections::BTreeMap::new();
        for _ in 0..2000 {
            let key = rng.gen_range(0..200u64);
            if rng.gen_bool(0.7) {
                t.insert(key, key);
                model.insert(key, key);
            } else {
                t.delete(key);
                model.remove(&key);
            }
        }
        for k in 0..200u64 {
            assert_eq!(t.get(k), model.get(&k).copied());
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn insert_then_get_round_trips(pairs: Vec<(u64, u64)>) -> bool {
        let mut t: Tree<u64> = Tree::create();
        let mut model = std::collections::BTreeMap::new();
        for &(k, v) in &pairs {
            t.insert(k, v);
            model.insert(k, v);
        }
        model.iter().all(|(&k, &v)| t.get(k) == Some(v))
    }

    #[quickcheck]
    fn delete_removes_key_and_nothing_else(mut keys: Vec<u64>) -> bool {
        keys.sort_unstable();
        keys.dedup();
        if keys.is_empty() {
            return true;
        }
        let mut t: Tree<u64> = Tree::create();
        for &k in &keys {
            t.insert(k, k);
        }
        let victim = keys[0];
        t.delete(victim);
        t.get(victim).is_none() && keys[1..].iter().all(|&k| t.get(k) == Some(k))
    }

    #[quickcheck]
    fn branch_is_isolated_from_parent_mutation(keys: Vec<u64>, extra_key: u64) -> TestResult {
        if keys.iter().any(|&k| k == extra_key) {
            return TestResult::discard();
        }
        let mut base: Tree<u64> = Tree::create();
        for &k in &keys {
            base.insert(k, k);
        }
        let mut branch = base.branch();
        branch.insert(extra_key, extra_key);
        if base.get(extra_key).is_some() {
            return TestResult::failed();
        }
        TestResult::from_bool(branch.get(extra_key) == Some(extra_key))
    }
}
