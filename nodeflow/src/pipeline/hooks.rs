//! Arguments handed to pipeline hooks.

use super::StageRef;
use crate::context::NodesetId;
use crate::nodes::NodeSet;
use serde::{Deserialize, Serialize};

/// A node subset at a stage, as seen by a hook.
#[derive(Debug, Clone, Copy)]
pub struct StageNodes<'a> {
    /// The stage concerned.
    pub stage: &'a StageRef,
    /// The nodes concerned.
    pub nodes: &'a NodeSet,
    /// Their nodeset id.
    pub nodeset_id: NodesetId,
}

/// Which implementation a retried subset runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// The implementation that just failed, again.
    SameImplementation,
    /// The next implementation of the fallback chain.
    Fallback,
}

/// One attempt that forked its nodeset into two remainders.
#[derive(Debug, Clone)]
pub struct SplitReport {
    /// The stage that ran.
    pub stage: StageRef,
    /// Nodeset id of the incoming set.
    pub parent: NodesetId,
    /// Id of the succeeded remainder.
    pub succeeded_id: NodesetId,
    /// The succeeded remainder.
    pub succeeded: NodeSet,
    /// Id of the failed remainder.
    pub failed_id: NodesetId,
    /// The failed remainder.
    pub failed: NodeSet,
}
