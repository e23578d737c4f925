//! Compile-time tuning constants.
//!
//! Per the design, node/leaf sizing, depth, join distance and cache
//! preallocation are fixed at compile time rather than exposed as runtime
//! configuration.

/// Maximum number of `(key, child)` slots in an internal node.
pub const NODE_CAPACITY: usize = 21;

/// Maximum depth of a tree (root to leaf, inclusive).
pub const MAX_DEPTH: usize = 64;

/// Bound on how many parent-steps `Version::join` walks in each chain
/// before giving up.
pub const JOIN_LIMIT: u16 = 3;

/// Number of nodes/leaves preallocated per thread-local cache.
pub const CACHE_PREALLOC: usize = 1024;

/// Number of `try_commit` attempts a `try_commit_merge` loop makes,
/// including the initial attempt.
pub const MAX_COMMIT_RETRIES: u32 = 4;

/// Leaf addressing unit used by the byte-level file adapter (§6).
pub const LEAF_SIZE: usize = 1024;

/// Sentinel denoting "past the end" in cursor ranges.
pub const KEY_MAX: u64 = u64::MAX;
