//! Error and outcome types.
//!
//! The tree/version/cache/cursor layers assert on invariant violation and
//! never return `Result` (see the error handling design). Only the merge
//! engine and the transaction boundary have typed, non-panicking outcomes.

use thiserror::Error;

/// Internal reason a structural merge step could not proceed.
///
/// Returned by the merge engine; always translated into
/// [`CommitOutcome::MergeFailed`](crate::transaction::CommitOutcome::MergeFailed)
/// at the transaction boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeError {
    /// The per-range decision table classified this range as conflicting.
    #[error("conflicting read/write/delete sets on the synchronized range")]
    Conflict,
    /// `do_replace` was asked to graft a taller global subtree onto a
    /// shorter private one; the source asserts this case false rather than
    /// implementing a promotion path, so this rewrite refuses it too.
    #[error("global subtree is taller than the private subtree at the replace point")]
    ReplaceTooTall,
    /// The private slot to replace was the rightmost slot of its parent,
    /// which would require a high-key cascade the engine does not support.
    #[error("cannot replace the rightmost slot without a high-key cascade")]
    ReplaceRightmost,
    /// `Version::join` did not find a common ancestor within `JOIN_LIMIT`
    /// steps in either chain.
    #[error("no common ancestor found within the join search limit")]
    JoinFailed,
}

pub type MergeResult<T> = Result<T, MergeError>;
