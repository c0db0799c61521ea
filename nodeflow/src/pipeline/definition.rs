//! The contract a concrete operation implements.

use super::{RetryKind, SplitReport, StageDescriptor, StageNodes};
use crate::config::{ConfigOverrides, ManagerSettings};
use crate::errors::ScheduleResult;
use crate::manager::PipelineReport;
use crate::nodes::NodeSet;
use crate::tasks::{Task, TaskCore};
use std::sync::Arc;
use tracing::warn;

/// What the factory needs to know about the slot it builds a task for.
#[derive(Debug, Clone)]
pub struct StageBinding<'a> {
    /// The descriptor at the slot.
    pub descriptor: &'a StageDescriptor,
    /// Overrides for the descriptor's nested table, if it has one.
    pub nested_overrides: ConfigOverrides,
    /// Timing of the dispatching manager, inherited by nested managers.
    pub settings: &'a ManagerSettings,
}

/// A concrete operation: a task factory plus hooks.
///
/// Hooks run synchronously on the scheduler and must not block. Apart from
/// `on_start`, `on_done` and `on_kill` they are observers.
pub trait Pipeline: Send + Sync {
    /// Name used in logs and events.
    fn name(&self) -> &str;

    /// Builds the task for one stage slot.
    ///
    /// # Errors
    ///
    /// A factory error terminates the manager.
    fn create_task(&self, core: TaskCore, binding: &StageBinding<'_>) -> ScheduleResult<Arc<dyn Task>>;

    /// Called once before the first dispatch.
    fn on_start(&self, _nodes: &NodeSet) {}

    /// Called once after the last classification, before `run` returns.
    fn on_done(&self, _report: &PipelineReport) {}

    /// Nodes completed the last stage.
    fn on_success(&self, _at: &StageNodes<'_>) {}

    /// Nodes failed with no retry or fallback left.
    fn on_fail(&self, _at: &StageNodes<'_>) {}

    /// Reports a terminal failure to the operator.
    fn display_fail_message(&self, at: &StageNodes<'_>) {
        warn!(
            pipeline = self.name(),
            stage = %at.stage,
            nodeset_id = %at.nodeset_id,
            nodes = %at.nodes,
            "nodes failed"
        );
    }

    /// Nodes halted at a breakpoint.
    fn on_break(&self, _at: &StageNodes<'_>) {}

    /// A task exceeded its stage timeout.
    fn on_timeout(&self, _at: &StageNodes<'_>) {}

    /// Failed nodes are attempted again. `at.stage` is the next attempt.
    fn on_retry(&self, _at: &StageNodes<'_>, _kind: RetryKind) {}

    /// An attempt forked its nodeset.
    fn on_split(&self, _split: &SplitReport) {}

    /// The manager is being killed. `unfinished` are the nodes folded into
    /// failed. Perform any rollback here.
    fn on_kill(&self, _unfinished: &NodeSet) {}
}
