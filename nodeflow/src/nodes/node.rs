//! A handle to one physical machine.

use crate::context::NodesetId;
use crate::manager::Outcome;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Where and how a node reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Name of the stage that classified the node.
    pub stage: String,
    /// Position of that stage in the table.
    pub position: usize,
    /// Fallback index inside that position.
    pub sub_position: usize,
    /// The nodeset the node travelled with.
    pub nodeset_id: NodesetId,
    /// The terminal outcome.
    pub outcome: Outcome,
}

#[derive(Debug)]
struct NodeInner {
    hostname: String,
    record: RwLock<Option<NodeRecord>>,
}

/// Opaque, cheaply clonable handle to a machine.
///
/// Equality, ordering and hashing use the hostname only.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a node handle.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                hostname: hostname.into(),
                record: RwLock::new(None),
            }),
        }
    }

    /// Returns the hostname.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Returns the terminal record, if the node has one.
    #[must_use]
    pub fn record(&self) -> Option<NodeRecord> {
        self.inner.record.read().clone()
    }

    /// Stores the terminal record, replacing any previous one.
    pub fn set_record(&self, record: NodeRecord) {
        *self.inner.record.write() = Some(record);
    }

    /// Forgets the terminal record.
    pub fn clear_record(&self) {
        *self.inner.record.write() = None;
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.inner.hostname == other.inner.hostname
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.hostname.cmp(&other.inner.hostname)
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hostname.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.inner.hostname).finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.hostname)
    }
}
