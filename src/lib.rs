//! `vbpt`: a versioned, copy-on-write B+-tree with speculative concurrent
//! transactions rebased via structural three-way merge.
//!
//! A private [`Transaction`] branches a [`tree::Tree`] off a shared
//! [`MutableTree`] handle, mutates it freely, and attempts to commit; if
//! another transaction committed first, [`merge::merge`] rebases the
//! branch onto the new committed state instead of failing outright.

pub mod cache;
pub mod config;
pub mod cursor;
pub mod error;
pub mod file;
pub mod log;
pub mod logtree;
pub mod merge;
pub mod mtree;
pub mod refcount;
pub mod tree;
pub mod transaction;
pub mod version;

pub use error::{MergeError, MergeResult};
pub use mtree::MutableTree;
pub use tree::Tree;
pub use transaction::{CommitOutcome, Transaction};
pub use version::Version;

/// Install `env_logger` as the global logger, ignoring the error if one is
/// already installed. A no-op when the `init_env_logger` feature (default
/// on) is disabled. Intended for test setup; see `log::trace`/`log::warn`
/// call sites in `merge`/`transaction`.
#[cfg(feature = "init_env_logger")]
pub fn init_logging() {
    let _ = env_logger::try_init();
}

#[cfg(not(feature = "init_env_logger"))]
pub fn init_logging() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_commit_and_merge() {
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
}
