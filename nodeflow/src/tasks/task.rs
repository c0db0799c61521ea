//! The task contract.

use super::TaskOutputs;
use crate::config::StageConfig;
use crate::context::{ExecutionContext, NodesetId};
use crate::errors::ScheduleResult;
use crate::nodes::NodeSet;
use crate::pipeline::StageRef;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a task is bound to at construction.
///
/// Built by the manager and handed to the pipeline factory. The binding is
/// permanent: a task never changes stage, nodes or context.
#[derive(Debug, Clone)]
pub struct TaskCore {
    stage: StageRef,
    nodes: NodeSet,
    nodeset_id: NodesetId,
    context: ExecutionContext,
    config: StageConfig,
    outputs: Arc<TaskOutputs>,
}

impl TaskCore {
    /// Binds a task to a stage slot and a node subset.
    #[must_use]
    pub fn new(
        stage: StageRef,
        nodes: NodeSet,
        nodeset_id: NodesetId,
        context: ExecutionContext,
        config: StageConfig,
    ) -> Self {
        let outputs = Arc::new(TaskOutputs::new(&nodes));
        Self {
            stage,
            nodes,
            nodeset_id,
            context,
            config,
            outputs,
        }
    }

    /// Returns the stage the task runs.
    #[must_use]
    pub fn stage(&self) -> &StageRef {
        &self.stage
    }

    /// Returns the incoming node set.
    #[must_use]
    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    /// Returns the nodeset id of the incoming set.
    #[must_use]
    pub fn nodeset_id(&self) -> NodesetId {
        self.nodeset_id
    }

    /// Returns the execution context.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns the resolved stage configuration.
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Returns the output sets.
    #[must_use]
    pub fn outputs(&self) -> &Arc<TaskOutputs> {
        &self.outputs
    }
}

/// One execution of one stage over one node subset.
///
/// `run` reports per-node results through [`TaskCore::outputs`] before it
/// returns. Nodes it leaves unreported are failed by the manager.
#[async_trait]
pub trait Task: Send + Sync {
    /// Returns the construction-time binding.
    fn core(&self) -> &TaskCore;

    /// Runs the stage logic. `Ok(false)` fails the attempt as a whole.
    ///
    /// # Errors
    ///
    /// An error is accounted like `Ok(false)` and reported to the caller of
    /// the manager once the pipeline is torn down.
    async fn run(&self) -> ScheduleResult<bool>;

    /// Requests early termination from another task.
    ///
    /// Must return promptly. A non-graceful kill skips final resource
    /// release, which is left to [`Task::free`].
    async fn kill(&self, _graceful: bool) {}

    /// Releases resources left behind by a non-graceful kill.
    fn free(&self) {}
}
