//! Thread-local-style free-list cache for nodes and leaves.
//!
//! The source decouples node/leaf allocation from the general allocator
//! with per-thread free lists, and folds "release the recycled node's
//! outgoing references" into the same code path that hands a node back
//! out. This rewrite keeps that contract as an explicit, owned value
//! (`Cache<V>`) rather than a hidden `thread_local!` global, in keeping
//! with the broader instruction to avoid process-wide singletons: a
//! caller that wants per-thread pools simply keeps one `Cache<V>` per
//! worker thread, which is the same effective lifetime discipline
//! without a hidden static. The B+-tree core (`tree.rs`) allocates
//! directly through `Arc::new` for clarity and does not route through
//! this cache; see DESIGN.md.

use std::sync::Arc;

use crate::config::CACHE_PREALLOC;
use crate::tree::{Leaf, Node};
use crate::version::Version;

/// A free-list pool of node and leaf allocations.
pub struct Cache<V> {
    free_nodes: Vec<Vec<(u64, crate::tree::NodeRef<V>)>>,
    free_leaves: Vec<()>,
}

impl<V> Cache<V> {
    pub fn new() -> Self {
        Cache {
            free_nodes: Vec::with_capacity(CACHE_PREALLOC),
            free_leaves: Vec::with_capacity(CACHE_PREALLOC),
        }
    }

    /// Hand back a node allocation, dropping (and thereby
    /// refcount-decrementing) every child it was still holding.
    pub fn put_node(&mut self, node: Arc<Node<V>>) {
        match Arc::try_unwrap(node) {
            Ok(mut owned) => {
                owned.slots.clear();
                self.free_nodes.push(owned.slots);
            }
            Err(_shared) => {
                // Still referenced elsewhere (e.g. from an older tree
                // version); nothing to recycle yet.
            }
        }
    }

    /// Obtain slot storage for a fresh node, reusing a freed
    /// allocation's backing `Vec` capacity when one is available.
    pub fn get_node_storage(&mut self) -> Vec<(u64, crate::tree::NodeRef<V>)> {
        self.free_nodes.pop().unwrap_or_default()
    }

    pub fn put_leaf(&mut self, leaf: Arc<Leaf<V>>) {
        if Arc::try_unwrap(leaf).is_ok() {
            self.free_leaves.push(());
        }
    }

    pub fn make_node(&mut self, version: Arc<Version>, slots: Vec<(u64, crate::tree::NodeRef<V>)>) -> Arc<Node<V>> {
        Arc::new(Node { version, slots })
    }
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Cache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeRef;

    #[test]
    fn put_node_releases_children_when_uniquely_owned() {
        let version = Version::create();
        let leaf = Arc::new(Leaf {
            version: Arc::clone(&version),
            value: 7u64,
        });
        let weak_leaf = Arc::downgrade(&leaf);
        let node = Arc::new(Node {
            version: Arc::clone(&version),
            slots: vec![(1, NodeRef::Leaf(leaf))],
        });
        let mut cache: Cache<u64> = Cache::new();
        cache.put_node(node);
        assert_eq!(weak_leaf.strong_count(), 0);
    }

    #[test]
    fn storage_is_reused_across_put_and_get() {
        let mut cache: Cache<u64> = Cache::new();
        let version = Version::create();
        let node = Arc::new(Node {
            version: Arc::clone(&version),
            slots: vec![(1, NodeRef::Leaf(Arc::new(Leaf { version, value: 1u64 })))],
        });
        cache.put_node(node);
        let storage = cache.get_node_storage();
        assert_eq!(storage.capacity() >= 1, true);
    }
}
