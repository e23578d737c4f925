//! Log-aware tree operations: thin wrappers that record an access in the
//! transaction's range log before delegating to the tree itself.

use std::sync::Arc;

use crate::log::RangeLog;
use crate::tree::Tree;

pub struct LogTree<V> {
    pub tree: Tree<V>,
    pub log: Arc<RangeLog>,
}

impl<V: Clone> LogTree<V> {
    pub fn new(tree: Tree<V>, log: Arc<RangeLog>) -> Self {
        LogTree { tree, log }
    }

    pub fn insert(&mut self, key: u64, value: V) -> Option<V> {
        self.log.log_write(key);
        self.tree.insert(key, value)
    }

    pub fn delete(&mut self, key: u64) -> Option<V> {
        self.log.log_delete(key);
        self.tree.delete(key)
    }

    pub fn get(&mut self, key: u64) -> Option<V> {
        self.log.log_read(key);
        self.tree.get(key)
    }

    pub fn finalize(&self) {
        self.log.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_records_write_set() {
        let mut lt = LogTree::new(Tree::<u64>::create(), RangeLog::new());
        lt.log.start();
        lt.insert(7, 70);
        assert!(lt.log.ws_key_exists(7, 1));
        assert_eq!(lt.get(7), Some(70));
        assert!(lt.log.rs_key_exists(7, 1));
    }
}
