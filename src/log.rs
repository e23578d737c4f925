//! Per-transaction range log: read/write/delete sets tracked as widening
//! `(start, len)` ranges, queried by the merge engine for conflicts.

use std::sync::Arc;
use parking_lot::Mutex;

/// A `(key, len)` range. `len == 0` denotes empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub key: u64,
    pub len: u64,
}

impl Range {
    pub const EMPTY: Range = Range { key: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn end_inclusive(&self) -> u64 {
        // `len` can reach `KEY_MAX`; saturate rather than overflow.
        self.key.saturating_add(self.len).saturating_sub(1)
    }

    pub fn contains_key(&self, key: u64) -> bool {
        !self.is_empty() && key >= self.key && key <= self.end_inclusive()
    }

    pub fn intersects(&self, other: &Range) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.key <= other.end_inclusive() && other.key <= self.end_inclusive()
    }

    /// Monotonically widen this range to additionally cover `key`.
    fn widen(&mut self, key: u64) {
        if self.is_empty() {
            self.key = key;
            self.len = 1;
        } else if key < self.key {
            self.len += self.key - key;
            self.key = key;
        } else if key >= self.key.saturating_add(self.len) {
            self.len = key - self.key + 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogState {
    Uninitialized,
    Started,
    Finalized,
}

struct RangeLogInner {
    state: LogState,
    rd_set: Range,
    wr_set: Range,
    rm_set: Range,
    parent: Option<Arc<RangeLog>>,
}

/// Per-transaction read/write/delete range sets, chained to a parent log
/// so the merge engine can walk `depth` ancestors when classifying
/// conflicts.
///
/// `log_conflict` and full `log_replay`, which the source defines only
/// for the hash-set log variant, have no methods here by design — the
/// range-log backend simply does not implement that part of the `Log`
/// interface (see [`crate::error`] and DESIGN.md).
pub struct RangeLog {
    inner: Mutex<RangeLogInner>,
}

impl RangeLog {
    pub fn new() -> Arc<RangeLog> {
        Arc::new(RangeLog {
            inner: Mutex::new(RangeLogInner {
                state: LogState::Uninitialized,
                rd_set: Range::EMPTY,
                wr_set: Range::EMPTY,
                rm_set: Range::EMPTY,
                parent: None,
            }),
        })
    }

    /// Branch a fresh, empty, `Started` log chained to `parent`.
    pub fn branch(parent: &Arc<RangeLog>) -> Arc<RangeLog> {
        Arc::new(RangeLog {
            inner: Mutex::new(RangeLogInner {
                state: LogState::Started,
                rd_set: Range::EMPTY,
                wr_set: Range::EMPTY,
                rm_set: Range::EMPTY,
                parent: Some(Arc::clone(parent)),
            }),
        })
    }

    pub fn start(&self) {
        let mut g = self.inner.lock();
        assert_eq!(g.state, LogState::Uninitialized, "log already started");
        g.state = LogState::Started;
    }

    pub fn finalize(&self) {
        let mut g = self.inner.lock();
        assert_eq!(g.state, LogState::Started, "finalize from non-started state");
        g.state = LogState::Finalized;
    }

    fn widen(&self, pick: impl Fn(&mut RangeLogInner) -> &mut Range, key: u64) {
        let mut g = self.inner.lock();
        assert_eq!(g.state, LogState::Started, "write to a non-started log");
        pick(&mut g).widen(key);
    }

    pub fn log_read(&self, key: u64) {
        self.widen(|g| &mut g.rd_set, key);
    }

    pub fn log_write(&self, key: u64) {
        self.widen(|g| &mut g.wr_set, key);
    }

    pub fn log_delete(&self, key: u64) {
        self.widen(|g| &mut g.rm_set, key);
    }

    fn walk<T>(&self, depth: u32, pick: impl Fn(&RangeLogInner) -> T, any: impl Fn(T) -> bool) -> bool {
        let mut cur = self.inner.lock();
        for _ in 0..depth.max(1) {
            if any(pick(&cur)) {
                return true;
            }
            let parent = match &cur.parent {
                Some(p) => Arc::clone(p),
                None => return false,
            };
            drop(cur);
            cur = parent.inner.lock();
        }
        false
    }

    pub fn rs_key_exists(&self, key: u64, depth: u32) -> bool {
        self.walk(depth, |g| g.rd_set, |r| r.contains_key(key))
    }

    pub fn ws_key_exists(&self, key: u64, depth: u32) -> bool {
        self.walk(depth, |g| g.wr_set, |r| r.contains_key(key))
    }

    pub fn ds_key_exists(&self, key: u64, depth: u32) -> bool {
        self.walk(depth, |g| g.rm_set, |r| r.contains_key(key))
    }

    pub fn rs_range_exists(&self, range: Range, depth: u32) -> bool {
        self.walk(depth, |g| g.rd_set, |r| r.intersects(&range))
    }

    pub fn ds_range_exists(&self, range: Range, depth: u32) -> bool {
        self.walk(depth, |g| g.rm_set, |r| r.intersects(&range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_grows_monotonically() {
        let mut r = Range::EMPTY;
        r.widen(10);
        assert_eq!(r, Range { key: 10, len: 1 });
        r.widen(15);
        assert_eq!(r, Range { key: 10, len: 6 });
        r.widen(5);
        assert_eq!(r, Range { key: 5, len: 11 });
    }

    #[test]
    fn log_read_then_query() {
        let log = RangeLog::new();
        log.start();
        log.log_read(42);
        assert!(log.rs_key_exists(42, 1));
        assert!(!log.rs_key_exists(43, 1));
        log.finalize();
    }

    #[test]
    #[should_panic(expected = "non-started")]
    fn write_before_start_panics() {
        let log = RangeLog::new();
        log.log_write(1);
    }

    #[test]
    fn walks_up_parent_chain_to_depth() {
        let root = RangeLog::new();
        root.start();
        root.log_write(100);
        let child = RangeLog::branch(&root);
        assert!(child.ws_key_exists(100, 2));
        assert!(!child.ws_key_exists(100, 1));
        assert!(!RangeLog::branch(&child).ws_key_exists(100, 1));
    }
}
