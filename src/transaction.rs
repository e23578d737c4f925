//! Transactions: private trees branched from the mutable handle, with
//! single-phase commit and bounded retry-with-merge.

use std::sync::Arc;

use log::warn;

use crate::config::MAX_COMMIT_RETRIES;
use crate::error::MergeError;
use crate::log::RangeLog;
use crate::logtree::LogTree;
use crate::merge::merge;
use crate::mtree::MutableTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Ok,
    Merged,
    Failed,
    MergeFailed,
}

pub struct Transaction<V> {
    base_ver: Arc<crate::version::Version>,
    logtree: LogTree<V>,
}

impl<V: Clone> Transaction<V> {
    /// Branch a private tree and log off `mtree`'s current committed state.
    pub fn alloc(mtree: &MutableTree<V>) -> Self {
        let (base_tree, base_log) = mtree.snapshot();
        let base_ver = Arc::clone(&base_tree.version);
        let tree = base_tree.branch();
        let log = RangeLog::branch(&base_log);
        Transaction {
            base_ver,
            logtree: LogTree::new(tree, log),
        }
    }

    /// The transaction's private tree and read/write/delete log, coupled
    /// so every mutation through this handle is logged: there is no way
    /// to insert, delete, or read a key here without the matching set
    /// being updated, which is what the merge engine relies on.
    pub fn logtree_mut(&mut self) -> &mut LogTree<V> {
        &mut self.logtree
    }

    /// Single-shot commit: installs iff the handle hasn't moved past
    /// `base_ver`. No merge is attempted on failure.
    pub fn try_commit(self, mtree: &MutableTree<V>) -> CommitOutcome {
        self.logtree.finalize();
        if mtree.try_install(&self.base_ver, self.logtree.tree, self.logtree.log) {
            CommitOutcome::Ok
        } else {
            CommitOutcome::Failed
        }
    }

    /// Commit with bounded retry-via-merge: on a failed install, rebase
    /// this transaction's tree onto the handle's current tree and retry,
    /// up to `MAX_COMMIT_RETRIES` attempts total.
    pub fn try_commit_merge(mut self, mtree: &MutableTree<V>) -> CommitOutcome {
        // The transaction's own read/write/delete sets are complete by the
        // time commit is attempted; merges only ever query the log, they
        // never append to it, so it is safe to finalize once, up front.
        self.logtree.finalize();
        let mut merged_any = false;
        for _ in 0..MAX_COMMIT_RETRIES {
            let (current_tree, current_log) = mtree.snapshot();
            if !crate::version::Version::eq(&current_tree.version, &self.base_ver) {
                match merge(
                    &current_tree,
                    &current_log,
                    &mut self.logtree.tree,
                    &self.logtree.log,
                ) {
                    Ok(new_base) => {
                        self.base_ver = new_base;
                        merged_any = true;
                    }
                    Err(e) => {
                        warn!("merge failed during commit retry: {e}");
                        return CommitOutcome::MergeFailed;
                    }
                }
            }
            if mtree.try_install(
                &self.base_ver,
                self.logtree.tree.try_clone(),
                Arc::clone(&self.logtree.log),
            ) {
                return if merged_any {
                    CommitOutcome::Merged
                } else {
                    CommitOutcome::Ok
                };
            }
        }
        CommitOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_without_contention_succeeds() {
        let mtree: MutableTree<u64> = MutableTree::new(Tree::create());
        let mut tx = Transaction::alloc(&mtree);
        tx.logtree_mut().insert(1, 10);
        assert_eq!(tx.try_commit(&mtree), CommitOutcome::Ok);
        let (committed, _) = mtree.snapshot();
        assert_eq!(committed.get(1), Some(10));
    }

    #[test]
    fn stale_commit_without_merge_fails() {
        let mtree: MutableTree<u64> = MutableTree::new(Tree::create());
        let mut tx1 = Transaction::alloc(&mtree);
        tx1.logtree_mut().insert(1, 10);

        let mut tx2 = Transaction::alloc(&mtree);
        tx2.logtree_mut().insert(2, 20);

        assert_eq!(tx1.try_commit(&mtree), CommitOutcome::Ok);
        assert_eq!(tx2.try_commit(&mtree), CommitOutcome::Failed);
    }

    #[test]
    fn disjoint_commit_with_merge_succeeds() {
        let mtree: MutableTree<u64> = MutableTree::new(Tree::create());
        let mut tx1 = Transaction::alloc(&mtree);
        tx1.logtree_mut().insert(1, 10);

        let mut tx2 = Transaction::alloc(&mtree);
        tx2.logtree_mut().insert(2, 20);

        assert_eq!(tx1.try_commit(&mtree), CommitOutcome::Ok);
        assert_eq!(tx2.try_commit_merge(&mtree), CommitOutcome::Merged);

        let (committed, _) = mtree.snapshot();
        assert_eq!(committed.get(1), Some(10));
        assert_eq!(committed.get(2), Some(20));
    }

    #[test]
    fn conflicting_commit_with_merge_fails() {
        crate::init_logging();
        let mtree: MutableTree<u64> = MutableTree::new(Tree::create());
        let mut seed = Transaction::alloc(&mtree);
        seed.logtree_mut().insert(5, 50);
        assert_eq!(seed.try_commit(&mtree), CommitOutcome::Ok);

        let mut tx1 = Transaction::alloc(&mtree);
        tx1.logtree_mut().insert(5, 500);

        let mut tx2 = Transaction::alloc(&mtree);
        tx2.logtree_mut().get(5);
        tx2.logtree_mut().insert(5, 999);

        assert_eq!(tx1.try_commit(&mtree), CommitOutcome::Ok);
        assert_eq!(tx2.try_commit_merge(&mtree), CommitOutcome::MergeFailed);
    }
}
