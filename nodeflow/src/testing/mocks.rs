//! Scripted tasks for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::StageConfig;
use crate::context::{ExecutionContext, NodesetId};
use crate::errors::{ScheduleError, ScheduleResult};
use crate::nodes::NodeSet;
use crate::pipeline::StageRef;
use crate::tasks::{Task, TaskCore};

/// What a scripted task does with one node on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Mark the node succeeded.
    Succeed,
    /// Mark the node failed.
    Fail,
    /// Mark the node breakpointed.
    Break,
    /// Mark the node both succeeded and failed.
    Both,
    /// Leave the node unclassified.
    Skip,
}

/// How a scripted task's `run` returns once its nodes are marked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    /// Return `Ok(true)`.
    Classify,
    /// Return `Ok(false)`.
    ReturnFalse,
    /// Return a stage logic error.
    Error(String),
    /// Return a manager-level error.
    Fatal(String),
    /// Panic.
    Panic(String),
    /// Never return.
    Hang,
    /// Return `Ok(false)` once the context is cancelled.
    WaitForCancel,
}

/// Behavior of every task built for one stage.
///
/// Node outcomes are scripted per attempt: the n-th run touching a node uses
/// the n-th entry of its list, and the last entry repeats.
#[derive(Debug)]
pub struct StageScript {
    default: NodeOutcome,
    per_node: HashMap<String, Vec<NodeOutcome>>,
    result: RunResult,
    delay: Duration,
    attempts: Mutex<HashMap<String, usize>>,
    runs: AtomicUsize,
    kills: Mutex<Vec<bool>>,
    frees: AtomicUsize,
    kill_panic: Option<String>,
}

impl Default for StageScript {
    fn default() -> Self {
        Self::new()
    }
}

impl StageScript {
    /// A script that succeeds every node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default: NodeOutcome::Succeed,
            per_node: HashMap::new(),
            result: RunResult::Classify,
            delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
            runs: AtomicUsize::new(0),
            kills: Mutex::new(Vec::new()),
            frees: AtomicUsize::new(0),
            kill_panic: None,
        }
    }

    /// Sets the outcome of nodes without a script of their own.
    #[must_use]
    pub fn default_outcome(mut self, outcome: NodeOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Scripts one node, attempt by attempt.
    #[must_use]
    pub fn node(mut self, hostname: impl Into<String>, outcomes: &[NodeOutcome]) -> Self {
        self.per_node.insert(hostname.into(), outcomes.to_vec());
        self
    }

    /// Scripts several nodes with the same attempts.
    #[must_use]
    pub fn nodes(mut self, hostnames: &[&str], outcomes: &[NodeOutcome]) -> Self {
        for hostname in hostnames {
            self.per_node.insert((*hostname).to_string(), outcomes.to_vec());
        }
        self
    }

    /// Sets how `run` returns.
    #[must_use]
    pub fn result(mut self, result: RunResult) -> Self {
        self.result = result;
        self
    }

    /// Sleeps before marking nodes.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `kill` panic after recording the call.
    #[must_use]
    pub fn panic_on_kill(mut self, message: impl Into<String>) -> Self {
        self.kill_panic = Some(message.into());
        self
    }

    /// Returns how many tasks ran this script.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Returns how many runs touched a node.
    #[must_use]
    pub fn attempts(&self, hostname: &str) -> usize {
        self.attempts.lock().get(hostname).copied().unwrap_or(0)
    }

    /// Returns the `graceful` flag of every kill received, in order.
    #[must_use]
    pub fn kills(&self) -> Vec<bool> {
        self.kills.lock().clone()
    }

    /// Returns how many times `free` was called.
    #[must_use]
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, hostname: &str) -> NodeOutcome {
        let mut attempts = self.attempts.lock();
        let attempt = attempts.entry(hostname.to_string()).or_insert(0);
        let outcome = self
            .per_node
            .get(hostname)
            .and_then(|outcomes| outcomes.get(*attempt).or_else(|| outcomes.last()))
            .copied()
            .unwrap_or(self.default);
        *attempt += 1;
        outcome
    }
}

/// A task that follows a [`StageScript`].
#[derive(Debug)]
pub struct ScriptedTask {
    core: TaskCore,
    script: Arc<StageScript>,
}

impl ScriptedTask {
    /// Creates a task bound to `core`.
    #[must_use]
    pub fn new(core: TaskCore, script: Arc<StageScript>) -> Self {
        Self { core, script }
    }

    /// Creates a standalone task at slot 0.0 over fresh nodes.
    #[must_use]
    pub fn for_hosts(stage: &str, hosts: &[&str]) -> Arc<Self> {
        let stage = StageRef {
            name: stage.to_string(),
            position: 0,
            sub_position: 0,
        };
        let core = TaskCore::new(
            stage,
            NodeSet::from_hosts(hosts.iter().copied()),
            NodesetId::new(0),
            ExecutionContext::new(),
            StageConfig::default(),
        );
        Arc::new(Self::new(core, Arc::new(StageScript::new())))
    }
}

#[async_trait]
impl Task for ScriptedTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    async fn run(&self) -> ScheduleResult<bool> {
        self.script.runs.fetch_add(1, Ordering::SeqCst);
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }

        let outputs = self.core.outputs();
        for node in self.core.nodes().iter() {
            match self.script.next_outcome(node.hostname()) {
                NodeOutcome::Succeed => outputs.mark_succeeded(node),
                NodeOutcome::Fail => outputs.mark_failed(node),
                NodeOutcome::Break => outputs.mark_breakpointed(node),
                NodeOutcome::Both => {
                    outputs.mark_succeeded(node);
                    outputs.mark_failed(node);
                }
                NodeOutcome::Skip => {}
            }
        }

        match &self.script.result {
            RunResult::Classify => Ok(true),
            RunResult::ReturnFalse => Ok(false),
            RunResult::Error(message) => Err(anyhow::anyhow!("{message}").into()),
            RunResult::Fatal(message) => Err(ScheduleError::coordinator(message.clone())),
            RunResult::Panic(message) => panic!("{message}"),
            RunResult::Hang => std::future::pending().await,
            RunResult::WaitForCancel => {
                self.core.context().cancel_token().cancelled().await;
                Ok(false)
            }
        }
    }

    async fn kill(&self, graceful: bool) {
        self.script.kills.lock().push(graceful);
        if let Some(message) = &self.script.kill_panic {
            panic!("{message}");
        }
    }

    fn free(&self) {
        self.script.frees.fetch_add(1, Ordering::SeqCst);
    }
}
