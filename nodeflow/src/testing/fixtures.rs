//! A scripted pipeline that records its hook calls.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use super::{ScriptedTask, StageScript};
use crate::config::ConfigOverrides;
use crate::context::NodesetId;
use crate::errors::{ScheduleError, ScheduleResult};
use crate::events::EventSink;
use crate::manager::{PipelineReport, TaskedTaskManager};
use crate::nodes::NodeSet;
use crate::pipeline::{Pipeline, RetryKind, SplitReport, StageBinding, StageNodes};
use crate::tasks::{Task, TaskCore};

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    /// `on_start` with the universe.
    Start(Vec<String>),
    /// `on_done`.
    Done {
        /// Succeeded hosts.
        succeeded: Vec<String>,
        /// Failed hosts.
        failed: Vec<String>,
        /// Breakpointed hosts.
        breakpointed: Vec<String>,
        /// Whether the run was killed.
        killed: bool,
    },
    /// `on_success`.
    Success(String, Vec<String>),
    /// `on_fail`.
    Fail(String, Vec<String>),
    /// `on_break`.
    Break(String, Vec<String>),
    /// `on_timeout`.
    Timeout(String, Vec<String>),
    /// `on_retry`, with the stage of the next attempt.
    Retry(String, RetryKind, Vec<String>),
    /// `on_split`.
    Split {
        /// The stage that ran.
        stage: String,
        /// Incoming nodeset id.
        parent: NodesetId,
        /// Id of the succeeded remainder.
        succeeded_id: NodesetId,
        /// Id of the failed remainder.
        failed_id: NodesetId,
        /// Succeeded hosts.
        succeeded: Vec<String>,
        /// Failed hosts.
        failed: Vec<String>,
    },
    /// `on_kill` with the folded nodes.
    Kill(Vec<String>),
}

impl HookCall {
    /// Returns the hook name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Done { .. } => "done",
            Self::Success(..) => "success",
            Self::Fail(..) => "fail",
            Self::Break(..) => "break",
            Self::Timeout(..) => "timeout",
            Self::Retry(..) => "retry",
            Self::Split { .. } => "split",
            Self::Kill(_) => "kill",
        }
    }
}

/// Ordered record of hook calls.
#[derive(Debug, Default)]
pub struct HookLog {
    calls: Mutex<Vec<HookCall>>,
}

impl HookLog {
    fn push(&self, call: HookCall) {
        self.calls.lock().push(call);
    }

    /// Returns every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }

    /// Returns how many times a hook fired.
    #[must_use]
    pub fn count(&self, hook: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.name() == hook).count()
    }

    /// Returns the calls of one hook.
    #[must_use]
    pub fn of(&self, hook: &str) -> Vec<HookCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.name() == hook)
            .cloned()
            .collect()
    }

    /// Returns the hosts passed to a per-stage hook for `stage`, merged.
    #[must_use]
    pub fn hosts(&self, hook: &str, stage: &str) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HookCall::Success(s, h)
                | HookCall::Fail(s, h)
                | HookCall::Break(s, h)
                | HookCall::Timeout(s, h)
                | HookCall::Retry(s, _, h)
                    if c.name() == hook && s == stage =>
                {
                    Some(h.clone())
                }
                _ => None,
            })
            .flatten()
            .collect();
        hosts.sort();
        hosts
    }
}

/// Builder for [`ScriptedPipeline`].
#[derive(Default)]
pub struct ScriptedPipelineBuilder {
    name: String,
    scripts: HashMap<String, Arc<StageScript>>,
    broken: HashSet<String>,
    nested_events: Option<Arc<dyn EventSink>>,
    nested_overrides: Option<ConfigOverrides>,
    private_counters: bool,
}

impl ScriptedPipelineBuilder {
    /// Scripts the tasks of one stage.
    #[must_use]
    pub fn script(mut self, stage: impl Into<String>, script: StageScript) -> Self {
        self.scripts.insert(stage.into(), Arc::new(script));
        self
    }

    /// Makes the factory fail for one stage.
    #[must_use]
    pub fn broken_factory(mut self, stage: impl Into<String>) -> Self {
        self.broken.insert(stage.into());
        self
    }

    /// Sets the event sink of nested managers.
    #[must_use]
    pub fn nested_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.nested_events = Some(events);
        self
    }

    /// Adds factory overrides to every nested table, on top of the caller's.
    #[must_use]
    pub fn nested_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.nested_overrides = Some(overrides);
        self
    }

    /// Gives every nested manager its own nodeset-id counter.
    #[must_use]
    pub fn private_counters(mut self) -> Self {
        self.private_counters = true;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Arc<ScriptedPipeline> {
        Arc::new_cyclic(|this| ScriptedPipeline {
            name: self.name,
            scripts: self.scripts,
            broken: self.broken,
            nested_events: self.nested_events,
            nested_overrides: self.nested_overrides,
            private_counters: self.private_counters,
            log: HookLog::default(),
            this: this.clone(),
        })
    }
}

/// A pipeline whose tasks follow per-stage scripts.
///
/// Stages with a nested table run as a [`TaskedTaskManager`] over the same
/// pipeline, so every level shares one script set and one hook log.
pub struct ScriptedPipeline {
    name: String,
    scripts: HashMap<String, Arc<StageScript>>,
    broken: HashSet<String>,
    nested_events: Option<Arc<dyn EventSink>>,
    nested_overrides: Option<ConfigOverrides>,
    private_counters: bool,
    log: HookLog,
    this: Weak<ScriptedPipeline>,
}

impl ScriptedPipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ScriptedPipelineBuilder {
        ScriptedPipelineBuilder {
            name: name.into(),
            ..ScriptedPipelineBuilder::default()
        }
    }

    /// Returns the hook log.
    #[must_use]
    pub fn log(&self) -> &HookLog {
        &self.log
    }

    /// Returns the script of a stage, if one was set.
    #[must_use]
    pub fn script(&self, stage: &str) -> Option<&Arc<StageScript>> {
        self.scripts.get(stage)
    }
}

fn hosts(nodes: &NodeSet) -> Vec<String> {
    nodes.hostnames()
}

impl Pipeline for ScriptedPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_task(
        &self,
        core: TaskCore,
        binding: &StageBinding<'_>,
    ) -> ScheduleResult<Arc<dyn Task>> {
        let stage = &binding.descriptor.name;
        if self.broken.contains(stage) {
            return Err(ScheduleError::factory(stage, "no such stage kind"));
        }

        if binding.descriptor.substages.is_some() {
            let this: Arc<dyn Pipeline> = self
                .this
                .upgrade()
                .ok_or_else(|| ScheduleError::factory(stage, "pipeline dropped"))?;
            let mut builder = TaskedTaskManager::from_binding(core, binding, this)?;
            if let Some(events) = &self.nested_events {
                builder = builder.with_event_sink(Arc::clone(events));
            }
            if let Some(overrides) = &self.nested_overrides {
                builder = builder.with_overrides(overrides.clone());
            }
            if self.private_counters {
                builder = builder.with_private_counter();
            }
            return Ok(Arc::new(builder.build()?));
        }

        let script = self
            .scripts
            .get(stage)
            .cloned()
            .unwrap_or_else(|| Arc::new(StageScript::new()));
        Ok(Arc::new(ScriptedTask::new(core, script)))
    }

    fn on_start(&self, nodes: &NodeSet) {
        self.log.push(HookCall::Start(hosts(nodes)));
    }

    fn on_done(&self, report: &PipelineReport) {
        self.log.push(HookCall::Done {
            succeeded: hosts(&report.succeeded),
            failed: hosts(&report.failed),
            breakpointed: hosts(&report.breakpointed),
            killed: report.killed,
        });
    }

    fn on_success(&self, at: &StageNodes<'_>) {
        self.log
            .push(HookCall::Success(at.stage.name.clone(), hosts(at.nodes)));
    }

    fn on_fail(&self, at: &StageNodes<'_>) {
        self.log.push(HookCall::Fail(at.stage.name.clone(), hosts(at.nodes)));
    }

    fn on_break(&self, at: &StageNodes<'_>) {
        self.log.push(HookCall::Break(at.stage.name.clone(), hosts(at.nodes)));
    }

    fn on_timeout(&self, at: &StageNodes<'_>) {
        self.log
            .push(HookCall::Timeout(at.stage.name.clone(), hosts(at.nodes)));
    }

    fn on_retry(&self, at: &StageNodes<'_>, kind: RetryKind) {
        self.log
            .push(HookCall::Retry(at.stage.name.clone(), kind, hosts(at.nodes)));
    }

    fn on_split(&self, split: &SplitReport) {
        self.log.push(HookCall::Split {
            stage: split.stage.name.clone(),
            parent: split.parent,
            succeeded_id: split.succeeded_id,
            failed_id: split.failed_id,
            succeeded: hosts(&split.succeeded),
            failed: hosts(&split.failed),
        });
    }

    fn on_kill(&self, unfinished: &NodeSet) {
        self.log.push(HookCall::Kill(hosts(unfinished)));
    }
}
