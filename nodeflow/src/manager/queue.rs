//! Transition messages and the queue linking workers to the coordinator.

use crate::context::{ExecutionContext, NodesetId};
use crate::errors::ScheduleError;
use crate::nodes::NodeSet;
use crate::pipeline::StageRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Terminal or intermediate outcome of a node subset at one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The stage succeeded for these nodes.
    Succeeded,
    /// The stage failed for these nodes.
    Failed,
    /// These nodes halted at a breakpoint.
    Breakpointed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Breakpointed => "breakpointed",
        })
    }
}

/// Where a transition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSource {
    /// The stage that produced the outcome.
    pub stage: StageRef,
    /// The outcome.
    pub outcome: Outcome,
}

/// A node subset moving between stages.
///
/// A transition without a source enters the pipeline at its first stage.
#[derive(Debug, Clone)]
pub struct Transition {
    /// The nodes.
    pub nodes: NodeSet,
    /// Their nodeset id.
    pub nodeset_id: NodesetId,
    /// The stage and outcome that produced this transition.
    pub source: Option<TransitionSource>,
    /// The context of the attempt, carrying its retry counter.
    pub context: ExecutionContext,
}

impl Transition {
    /// Creates a transition entering the pipeline.
    #[must_use]
    pub fn initial(nodes: NodeSet, nodeset_id: NodesetId, context: ExecutionContext) -> Self {
        Self {
            nodes,
            nodeset_id,
            source: None,
            context,
        }
    }

    /// Creates a transition produced by a stage.
    #[must_use]
    pub fn from_stage(
        stage: StageRef,
        outcome: Outcome,
        nodes: NodeSet,
        nodeset_id: NodesetId,
        context: ExecutionContext,
    ) -> Self {
        Self {
            nodes,
            nodeset_id,
            source: Some(TransitionSource { stage, outcome }),
            context,
        }
    }

    /// Returns the outcome, if the transition comes from a stage.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.source.as_ref().map(|s| s.outcome)
    }
}

pub(crate) enum Envelope {
    Transition(Transition),
    Abort(ScheduleError),
}

/// Unbounded FIFO of transitions, shared by every clone.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    len: Arc<AtomicUsize>,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            len: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueues a transition.
    pub fn push(&self, transition: Transition) {
        self.send(Envelope::Transition(transition));
    }

    /// Enqueues an error that must stop the coordinator.
    pub(crate) fn abort(&self, error: ScheduleError) {
        self.send(Envelope::Abort(error));
    }

    fn send(&self, envelope: Envelope) {
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(envelope).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            debug!("work queue closed, message dropped");
        }
    }

    /// Waits for the next message.
    pub(crate) async fn pop(&self) -> Option<Envelope> {
        let envelope = self.rx.lock().await.recv().await;
        if envelope.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        envelope
    }

    /// Discards every pending message and returns how many there were.
    pub async fn drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            drained += 1;
        }
        drained
    }

    /// Returns the number of pending messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Returns true if no message is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(hosts: &[&str], id: u64) -> Transition {
        Transition::initial(
            NodeSet::from_hosts(hosts.iter().copied()),
            NodesetId::new(id),
            ExecutionContext::new(),
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(transition(&["n1"], 0));
        queue.push(transition(&["n2"], 1));
        assert_eq!(queue.len(), 2);

        let Some(Envelope::Transition(first)) = queue.pop().await else {
            panic!("expected a transition");
        };
        assert_eq!(first.nodeset_id, NodesetId::new(0));
        assert!(first.outcome().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_the_queue() {
        let queue = WorkQueue::new();
        let producer = queue.clone();
        producer.push(transition(&["n1"], 3));
        producer.abort(ScheduleError::coordinator("stop"));

        assert!(matches!(queue.pop().await, Some(Envelope::Transition(_))));
        assert!(matches!(queue.pop().await, Some(Envelope::Abort(_))));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain() {
        let queue = WorkQueue::new();
        for id in 0..5 {
            queue.push(transition(&["n1"], id));
        }
        assert_eq!(queue.drain().await, 5);
        assert!(queue.is_empty());
        assert_eq!(queue.drain().await, 0);
    }

    #[test]
    fn test_stage_transition() {
        let stage = StageRef {
            name: "reboot".to_string(),
            position: 1,
            sub_position: 0,
        };
        let t = Transition::from_stage(
            stage.clone(),
            Outcome::Failed,
            NodeSet::from_hosts(["n1"]),
            NodesetId::new(2),
            ExecutionContext::new(),
        );
        assert_eq!(t.outcome(), Some(Outcome::Failed));
        assert_eq!(t.source.unwrap().stage, stage);
        assert_eq!(Outcome::Breakpointed.to_string(), "breakpointed");
    }
}
