//! Output sets of one task, behind the lock shared with the manager.

use crate::nodes::{Node, NodeSet};
use parking_lot::{Mutex, MutexGuard};

/// What a task has reported about its nodes so far.
///
/// `assigned` starts as the incoming set and only shrinks: the manager
/// empties it when it classifies the task, and a nested pipeline removes the
/// nodes it forwards to its embedding pipeline.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    /// Nodes this task is still accountable for.
    pub assigned: NodeSet,
    /// Nodes the stage logic reported as succeeded.
    pub succeeded: NodeSet,
    /// Nodes the stage logic reported as failed.
    pub failed: NodeSet,
    /// Nodes the stage logic halted at a breakpoint.
    pub breakpointed: NodeSet,
}

/// The three output sets of a task plus its remaining assignment.
///
/// Stage logic writes through the `mark_*` helpers or through [`lock`]
/// directly. The manager takes the same lock while classifying, which
/// serializes the two writers.
///
/// [`lock`]: TaskOutputs::lock
#[derive(Debug, Default)]
pub struct TaskOutputs {
    state: Mutex<TaskState>,
}

impl TaskOutputs {
    /// Creates outputs for a task assigned `nodes`.
    #[must_use]
    pub fn new(nodes: &NodeSet) -> Self {
        Self {
            state: Mutex::new(TaskState {
                assigned: nodes.linked_copy(),
                ..TaskState::default()
            }),
        }
    }

    /// Takes the task lock.
    pub fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock()
    }

    /// Reports one node as succeeded.
    pub fn mark_succeeded(&self, node: &Node) {
        self.state.lock().succeeded.add(node.clone());
    }

    /// Reports one node as failed.
    pub fn mark_failed(&self, node: &Node) {
        self.state.lock().failed.add(node.clone());
    }

    /// Reports one node as breakpointed.
    pub fn mark_breakpointed(&self, node: &Node) {
        self.state.lock().breakpointed.add(node.clone());
    }

    /// Reports every assigned node as succeeded.
    pub fn succeed_all(&self) {
        let mut state = self.state.lock();
        let assigned = state.assigned.clone();
        state.succeeded.extend(&assigned);
    }

    /// Reports every assigned node as failed.
    pub fn fail_all(&self) {
        let mut state = self.state.lock();
        let assigned = state.assigned.clone();
        state.failed.extend(&assigned);
    }

    /// Returns a copy of the remaining assignment.
    #[must_use]
    pub fn assigned(&self) -> NodeSet {
        self.state.lock().assigned.clone()
    }

    /// Returns true once the task is accountable for no node.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.state.lock().assigned.is_empty()
    }

    /// Returns a copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> TaskState {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_are_recorded() {
        let nodes = NodeSet::from_hosts(["n1", "n2", "n3"]);
        let outputs = TaskOutputs::new(&nodes);

        outputs.mark_succeeded(nodes.get("n1").unwrap());
        outputs.mark_failed(nodes.get("n2").unwrap());
        outputs.mark_breakpointed(nodes.get("n3").unwrap());

        let state = outputs.snapshot();
        assert_eq!(state.succeeded.hostnames(), vec!["n1"]);
        assert_eq!(state.failed.hostnames(), vec!["n2"]);
        assert_eq!(state.breakpointed.hostnames(), vec!["n3"]);
        assert_eq!(state.assigned.len(), 3);
    }

    #[test]
    fn test_assignment_is_a_linked_copy() {
        let nodes = NodeSet::from_hosts(["n1", "n2"]);
        let outputs = TaskOutputs::new(&nodes);
        assert!(outputs.assigned().same_members(&nodes));
        assert!(outputs.lock().assigned.is_linked_to(&nodes));

        outputs.lock().assigned.clear();
        assert!(outputs.is_drained());
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_bulk_marks() {
        let nodes = NodeSet::from_hosts(["n1", "n2"]);
        let outputs = TaskOutputs::new(&nodes);
        outputs.succeed_all();
        assert_eq!(outputs.snapshot().succeeded.len(), 2);

        outputs.fail_all();
        assert_eq!(outputs.snapshot().failed.len(), 2);
    }
}
