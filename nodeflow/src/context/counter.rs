//! Nodeset identifiers and the counter that hands them out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracing identifier attached to every in-flight node subset.
///
/// Ids exist for log correlation and for addressing forks in reports. The
/// scheduler never makes decisions based on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodesetId(u64);

impl NodesetId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared monotonically increasing nodeset-id source.
///
/// Cloning shares the counter. [`NodesetIdCounter::fork`] creates an
/// independent counter for a nested pipeline that must not interleave its
/// numbering with its siblings.
#[derive(Debug, Clone, Default)]
pub struct NodesetIdCounter {
    next: Arc<AtomicU64>,
}

impl NodesetIdCounter {
    /// Creates a counter whose first id is 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> NodesetId {
        NodesetId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates two fresh ids for the halves of a split.
    pub fn split(&self) -> (NodesetId, NodesetId) {
        (self.next_id(), self.next_id())
    }

    /// Returns the id the next allocation would return.
    #[must_use]
    pub fn peek(&self) -> NodesetId {
        NodesetId(self.next.load(Ordering::SeqCst))
    }

    /// Returns an independent counter continuing from the current value.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::starting_at(self.next.load(Ordering::SeqCst))
    }

    /// Returns true if both handles share one counter.
    #[must_use]
    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.next, &other.next)
    }
}
