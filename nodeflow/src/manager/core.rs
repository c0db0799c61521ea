//! The task manager: coordinator loop, watchdog, teardown and kill.

use super::ledger::Ledger;
use super::lifecycle::Lifecycle;
use super::queue::{Envelope, Outcome, Transition, WorkQueue};
use super::worker::{panic_message, run_worker};
use super::workers::Worker;
use super::{PipelineReport, WorkerRegistry};
use crate::config::{
    ConfigOverrides, ManagerSettings, ResolvedOperation, StageConfig, StageConfigMap,
};
use crate::context::{ExecutionContext, NodesetId, OuterLink};
use crate::errors::{ScheduleError, ScheduleResult};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::nodes::{NodeRecord, NodeSet};
use crate::pipeline::{Pipeline, RetryKind, StageBinding, StageNodes, StageRef, StageTable};
use crate::tasks::TaskOutputs;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};
use uuid::Uuid;

/// Where a nested manager forwards the terminal outcomes of its stages.
#[derive(Debug, Clone)]
pub(crate) struct RaiseTarget {
    pub(crate) outer: OuterLink,
    pub(crate) stage: StageRef,
    pub(crate) nodes: NodeSet,
    pub(crate) nodeset_id: NodesetId,
    pub(crate) context: ExecutionContext,
    pub(crate) outputs: Arc<TaskOutputs>,
}

#[derive(Default)]
struct Handles {
    coordinator: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub(crate) run_id: Uuid,
    pub(crate) pipeline: Arc<dyn Pipeline>,
    table: StageTable,
    configs: StageConfigMap,
    overrides: ConfigOverrides,
    settings: ManagerSettings,
    pub(crate) queue: WorkQueue,
    pub(crate) registry: WorkerRegistry,
    ledger: Mutex<Ledger>,
    lifecycle: Lifecycle,
    pub(crate) context: ExecutionContext,
    nodeset_id: NodesetId,
    events: Arc<dyn EventSink>,
    raise: Option<RaiseTarget>,
    handles: Mutex<Handles>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    /// Set once `on_start` has fired; `on_done` only fires after it.
    announced: AtomicBool,
    report: Mutex<Option<PipelineReport>>,
    span: Span,
}

/// Builder for [`TaskManager`].
pub struct TaskManagerBuilder {
    pipeline: Arc<dyn Pipeline>,
    nodes: NodeSet,
    table: StageTable,
    overrides: ConfigOverrides,
    settings: ManagerSettings,
    context: Option<ExecutionContext>,
    nodeset_id: Option<NodesetId>,
    events: Arc<dyn EventSink>,
    raise: Option<RaiseTarget>,
}

impl TaskManagerBuilder {
    /// Starts a builder driving `nodes` through `table`.
    #[must_use]
    pub fn new(pipeline: Arc<dyn Pipeline>, nodes: NodeSet, table: StageTable) -> Self {
        Self {
            pipeline,
            nodes,
            table,
            overrides: ConfigOverrides::default(),
            settings: ManagerSettings::default(),
            context: None,
            nodeset_id: None,
            events: Arc::new(NoOpEventSink),
            raise: None,
        }
    }

    /// Sets the caller overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Sets the manager timing.
    #[must_use]
    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the root execution context.
    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the nodeset id of the initial set. Allocated from the context
    /// counter otherwise.
    #[must_use]
    pub fn with_nodeset_id(mut self, nodeset_id: NodesetId) -> Self {
        self.nodeset_id = Some(nodeset_id);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn with_raise(mut self, raise: Option<RaiseTarget>) -> Self {
        self.raise = raise;
        self
    }

    /// Validates the table, resolves stage configuration and builds the
    /// manager.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::Config` for an invalid table or an override
    /// naming an unknown stage.
    pub fn build(self) -> ScheduleResult<TaskManager> {
        self.table.validate()?;
        let configs = StageConfigMap::resolve(&self.table, &self.overrides)?;

        let context = self.context.unwrap_or_default();
        let nodeset_id = self
            .nodeset_id
            .unwrap_or_else(|| context.counter().next_id());
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id, pipeline = %self.pipeline.name());

        Ok(TaskManager {
            shared: Arc::new(Shared {
                run_id,
                pipeline: self.pipeline,
                table: self.table,
                configs,
                overrides: self.overrides,
                settings: self.settings,
                queue: WorkQueue::new(),
                registry: WorkerRegistry::new(),
                ledger: Mutex::new(Ledger::new(self.nodes)),
                lifecycle: Lifecycle::new(),
                context,
                nodeset_id,
                events: self.events,
                raise: self.raise,
                handles: Mutex::new(Handles::default()),
                started_at: Mutex::new(None),
                announced: AtomicBool::new(false),
                report: Mutex::new(None),
                span,
            }),
        })
    }
}

/// Drives one node universe through one stage table.
///
/// Cloning shares the manager, so one clone can `run` while another kills.
#[derive(Clone)]
pub struct TaskManager {
    pub(crate) shared: Arc<Shared>,
}

impl TaskManager {
    /// Starts a builder.
    #[must_use]
    pub fn builder(
        pipeline: Arc<dyn Pipeline>,
        nodes: NodeSet,
        table: StageTable,
    ) -> TaskManagerBuilder {
        TaskManagerBuilder::new(pipeline, nodes, table)
    }

    /// Starts a builder from a loaded operation.
    #[must_use]
    pub fn from_operation(
        pipeline: Arc<dyn Pipeline>,
        nodes: NodeSet,
        operation: ResolvedOperation,
    ) -> TaskManagerBuilder {
        TaskManagerBuilder::new(pipeline, nodes, operation.stages)
            .with_overrides(operation.overrides)
            .with_settings(operation.manager)
    }

    /// Runs the pipeline to completion.
    ///
    /// Returns once every node is terminal, after the `done` hook.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the coordinator, or else the first
    /// stage logic error, once the pipeline is torn down.
    pub async fn run(&self) -> ScheduleResult<PipelineReport> {
        self.start();
        self.wait().await
    }

    /// Launches the coordinator and watchdog without waiting.
    ///
    /// Returns false if the manager was already started or closed.
    pub fn start(&self) -> bool {
        let shared = &self.shared;
        let mut handles = shared.handles.lock();
        if !shared.lifecycle.try_start() {
            return false;
        }
        *shared.started_at.lock() = Some(Utc::now());

        handles.watchdog = Some(tokio::spawn(
            Arc::clone(shared).watchdog().instrument(shared.span.clone()),
        ));
        handles.coordinator = Some(tokio::spawn(
            Arc::clone(shared).coordinate().instrument(shared.span.clone()),
        ));
        true
    }

    /// Waits for the pipeline to finish.
    ///
    /// # Errors
    ///
    /// Same as [`TaskManager::run`].
    pub async fn wait(&self) -> ScheduleResult<PipelineReport> {
        self.shared.lifecycle.wait_finished().await;
        self.shared.outcome()
    }

    /// Kills the pipeline.
    ///
    /// Running tasks are asked to stop and given the grace period, then the
    /// coordinator, watchdog and remaining workers are stopped. Every node
    /// not yet terminal is failed. A no-op on a finished manager.
    pub async fn kill(&self) {
        self.shared.kill(true).await;
    }

    /// Kills the pipeline without a grace period.
    pub(crate) async fn terminate(&self) {
        self.shared.kill(false).await;
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        self.shared.pipeline.name()
    }

    /// Returns the nodes that reached a terminal state so far.
    #[must_use]
    pub fn nodes_done(&self) -> NodeSet {
        self.shared.ledger.lock().done().clone()
    }

    /// Returns true once `run` would return.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.lifecycle.is_finished()
    }

    /// Returns true if the manager was killed.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.shared.lifecycle.is_killed()
    }

    /// Returns the number of workers still running.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.registry.live()
    }

    /// Returns the resolved configuration of a stage.
    #[must_use]
    pub fn stage_config(&self, name: &str) -> Option<StageConfig> {
        self.shared.configs.get(name).cloned()
    }

    /// Returns the report of a finished run.
    #[must_use]
    pub fn report(&self) -> Option<PipelineReport> {
        self.shared.report.lock().clone()
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("run_id", &self.shared.run_id)
            .field("pipeline", &self.shared.pipeline.name())
            .field("stages", &self.shared.table.len())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub(crate) fn stage_config(&self, name: &str) -> StageConfig {
        self.configs.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn emit(&self, event_type: &str, data: serde_json::Value) {
        let mut payload = serde_json::json!({
            "run_id": self.run_id.to_string(),
            "pipeline": self.pipeline.name(),
        });
        if let (Some(payload), serde_json::Value::Object(data)) = (payload.as_object_mut(), data) {
            payload.extend(data);
        }
        self.events.try_emit(event_type, Some(payload));
    }

    pub(crate) fn record_error(&self, error: ScheduleError) {
        self.ledger.lock().set_deferred(error);
    }

    pub(crate) fn record_fatal(&self, error: ScheduleError) {
        self.ledger.lock().set_fatal(error);
    }

    fn available(&self, nodes: &NodeSet) -> NodeSet {
        self.ledger.lock().available(nodes)
    }

    fn is_complete(&self) -> bool {
        self.ledger.lock().is_complete()
    }

    /// Fails every node not done yet. Each one is recorded against the last
    /// stage it was dispatched to, or the first stage if it never left the
    /// queue.
    fn fold_unfinished(&self) -> NodeSet {
        let mut ledger = self.ledger.lock();
        let unfinished = ledger.fold_unfinished();
        let entry = self.table.stage_ref(0, 0);
        for node in unfinished.iter() {
            let seen = ledger
                .last_seen(node.hostname())
                .cloned()
                .or_else(|| entry.clone().map(|stage| (stage, self.nodeset_id)));
            if let Some((stage, nodeset_id)) = seen {
                node.set_record(NodeRecord {
                    stage: stage.name,
                    position: stage.position,
                    sub_position: stage.sub_position,
                    nodeset_id,
                    outcome: Outcome::Failed,
                });
            }
        }
        unfinished
    }

    async fn coordinate(self: Arc<Self>) {
        let result = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(ScheduleError::coordinator(format!(
                "coordinator panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match failure {
            None => self.complete().await,
            Some(e) => {
                error!(error = %e, "pipeline aborted");
                self.ledger.lock().set_fatal(e);
                self.abort().await;
            }
        }
    }

    async fn drive(self: &Arc<Self>) -> ScheduleResult<()> {
        let universe = self.ledger.lock().universe().clone();
        info!(nodes = universe.len(), stages = self.table.len(), "pipeline started");
        self.announced.store(true, Ordering::SeqCst);
        self.pipeline.on_start(&universe);
        self.emit(
            events::PIPELINE_STARTED,
            serde_json::json!({"nodes": universe.hostnames(), "nodeset_id": self.nodeset_id}),
        );

        if universe.is_empty() {
            return Ok(());
        }
        self.queue.push(Transition::initial(
            universe,
            self.nodeset_id,
            self.context.clone(),
        ));

        loop {
            let envelope = self
                .queue
                .pop()
                .await
                .ok_or_else(|| ScheduleError::coordinator("work queue closed"))?;
            match envelope {
                Envelope::Abort(e) => return Err(e),
                Envelope::Transition(transition) => self.handle(transition)?,
            }
            self.reap();
            if self.is_complete() {
                return Ok(());
            }
        }
    }

    fn handle(self: &Arc<Self>, transition: Transition) -> ScheduleResult<()> {
        let Transition {
            nodes,
            nodeset_id,
            source,
            mut context,
        } = transition;

        let nodes = self.available(&nodes);
        if nodes.is_empty() {
            trace!(nodeset_id = %nodeset_id, "dropping transition without available nodes");
            return Ok(());
        }

        let Some(source) = source else {
            context.reset_retries();
            return self.dispatch(0, 0, nodes, nodeset_id, context);
        };
        let stage = source.stage;

        match source.outcome {
            Outcome::Breakpointed => {
                self.finish_nodes(Outcome::Breakpointed, &stage, &nodes, nodeset_id);
                Ok(())
            }
            Outcome::Succeeded if stage.position + 1 < self.table.len() => {
                context.reset_retries();
                self.dispatch(stage.position + 1, 0, nodes, nodeset_id, context)
            }
            Outcome::Succeeded => {
                self.finish_nodes(Outcome::Succeeded, &stage, &nodes, nodeset_id);
                Ok(())
            }
            Outcome::Failed => {
                let retries = self.stage_config(&stage.name).retries;
                if context.retries() < retries {
                    context.increment_retries();
                    debug!(
                        stage = %stage,
                        nodeset_id = %nodeset_id,
                        nodes = nodes.len(),
                        attempt = context.retries() + 1,
                        "retrying stage"
                    );
                    let at = StageNodes {
                        stage: &stage,
                        nodes: &nodes,
                        nodeset_id,
                    };
                    self.pipeline.on_retry(&at, RetryKind::SameImplementation);
                    self.emit(
                        events::STAGE_RETRY,
                        serde_json::json!({
                            "stage": stage.name,
                            "position": stage.position,
                            "sub_position": stage.sub_position,
                            "nodeset_id": nodeset_id,
                            "nodes": nodes.hostnames(),
                            "retry": context.retries(),
                        }),
                    );
                    self.dispatch(stage.position, stage.sub_position, nodes, nodeset_id, context)
                } else if let Some(next) = self
                    .table
                    .stage_ref(stage.position, stage.sub_position + 1)
                {
                    context.reset_retries();
                    debug!(
                        from = %stage,
                        to = %next,
                        nodeset_id = %nodeset_id,
                        nodes = nodes.len(),
                        "falling back"
                    );
                    let at = StageNodes {
                        stage: &next,
                        nodes: &nodes,
                        nodeset_id,
                    };
                    self.pipeline.on_retry(&at, RetryKind::Fallback);
                    self.emit(
                        events::STAGE_FALLBACK,
                        serde_json::json!({
                            "from": stage.name,
                            "stage": next.name,
                            "position": next.position,
                            "sub_position": next.sub_position,
                            "nodeset_id": nodeset_id,
                            "nodes": nodes.hostnames(),
                        }),
                    );
                    self.dispatch(next.position, next.sub_position, nodes, nodeset_id, context)
                } else {
                    self.finish_nodes(Outcome::Failed, &stage, &nodes, nodeset_id);
                    Ok(())
                }
            }
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        position: usize,
        sub_position: usize,
        nodes: NodeSet,
        nodeset_id: NodesetId,
        context: ExecutionContext,
    ) -> ScheduleResult<()> {
        let (Some(stage), Some(descriptor)) = (
            self.table.stage_ref(position, sub_position),
            self.table.descriptor(position, sub_position),
        ) else {
            return Err(ScheduleError::coordinator(format!(
                "no stage at position {position}.{sub_position}"
            )));
        };
        let config = self.stage_config(&stage.name);
        self.ledger.lock().track(&stage, &nodes, nodeset_id);

        if config.breakpoint {
            info!(
                stage = %stage,
                nodeset_id = %nodeset_id,
                nodes = nodes.len(),
                "breakpoint reached"
            );
            self.emit(
                events::STAGE_BREAKPOINT,
                serde_json::json!({
                    "stage": stage.name,
                    "position": position,
                    "sub_position": sub_position,
                    "nodeset_id": nodeset_id,
                    "nodes": nodes.hostnames(),
                }),
            );
            self.finish_nodes(Outcome::Breakpointed, &stage, &nodes, nodeset_id);
            return Ok(());
        }

        let context = context.with_outer(OuterLink {
            run_id: self.run_id,
            pipeline: self.pipeline.name().to_string(),
            queue: self.queue.clone(),
        });
        let binding = StageBinding {
            descriptor,
            nested_overrides: self.overrides.for_nested(&stage.name),
            settings: &self.settings,
        };
        let count = nodes.len();
        let hosts = nodes.hostnames();
        let core = crate::tasks::TaskCore::new(stage.clone(), nodes, nodeset_id, context, config);

        let task = self
            .pipeline
            .create_task(core, &binding)
            .map_err(|e| match e {
                e @ ScheduleError::Factory { .. } => e,
                other => ScheduleError::factory(&stage.name, other.to_string()),
            })?;

        debug!(stage = %stage, nodeset_id = %nodeset_id, nodes = count, "dispatching task");
        self.emit(
            events::STAGE_DISPATCHED,
            serde_json::json!({
                "stage": stage.name,
                "position": position,
                "sub_position": sub_position,
                "nodeset_id": nodeset_id,
                "nodes": hosts,
            }),
        );

        let worker = run_worker(Arc::clone(self), Arc::clone(&task));
        let handle = tokio::spawn(worker.instrument(Span::current()));
        if !self.registry.insert(task, handle) {
            debug!(stage = %stage, "manager closing, worker dropped");
        }
        Ok(())
    }

    /// Records nodes as terminal, runs the matching hooks, and forwards them
    /// to the embedding pipeline when the stage is raisable.
    pub(crate) fn finish_nodes(
        &self,
        outcome: Outcome,
        stage: &StageRef,
        nodes: &NodeSet,
        nodeset_id: NodesetId,
    ) {
        let recorded = self.ledger.lock().record(outcome, nodes);
        if recorded.is_empty() {
            return;
        }
        for node in recorded.iter() {
            node.set_record(NodeRecord {
                stage: stage.name.clone(),
                position: stage.position,
                sub_position: stage.sub_position,
                nodeset_id,
                outcome,
            });
        }

        let at = StageNodes {
            stage,
            nodes: &recorded,
            nodeset_id,
        };
        let event_type = match outcome {
            Outcome::Succeeded => {
                info!(stage = %stage, nodeset_id = %nodeset_id, nodes = recorded.len(), "nodes succeeded");
                self.pipeline.on_success(&at);
                events::NODES_SUCCEEDED
            }
            Outcome::Failed => {
                warn!(stage = %stage, nodeset_id = %nodeset_id, nodes = recorded.len(), "nodes failed");
                self.pipeline.on_fail(&at);
                self.pipeline.display_fail_message(&at);
                events::NODES_FAILED
            }
            Outcome::Breakpointed => {
                self.pipeline.on_break(&at);
                events::NODES_BREAKPOINTED
            }
        };
        self.emit(
            event_type,
            serde_json::json!({
                "stage": stage.name,
                "position": stage.position,
                "sub_position": stage.sub_position,
                "nodeset_id": nodeset_id,
                "nodes": recorded.hostnames(),
            }),
        );

        if outcome != Outcome::Breakpointed && self.stage_config(&stage.name).raisable {
            self.raise(outcome, &recorded);
        }
    }

    fn raise(&self, outcome: Outcome, nodes: &NodeSet) {
        let Some(target) = &self.raise else {
            return;
        };
        let forwarded = {
            let mut state = target.outputs.lock();
            let forwarded = nodes.intersection(&state.assigned);
            state.assigned.remove_all(&forwarded);
            forwarded
        };
        if forwarded.is_empty() {
            return;
        }

        let nodeset_id = if forwarded.same_members(&target.nodes) {
            target.nodeset_id
        } else {
            target.context.counter().next_id()
        };
        debug!(
            outer = %target.outer.pipeline,
            stage = %target.stage,
            nodeset_id = %nodeset_id,
            nodes = forwarded.len(),
            %outcome,
            "raising nodes"
        );
        self.emit(
            events::NODES_RAISED,
            serde_json::json!({
                "outer_run_id": target.outer.run_id.to_string(),
                "stage": target.stage.name,
                "outcome": outcome,
                "nodeset_id": nodeset_id,
                "nodes": forwarded.hostnames(),
            }),
        );
        target.outer.queue.push(Transition::from_stage(
            target.stage.clone(),
            outcome,
            forwarded,
            nodeset_id,
            target.context.clone(),
        ));
    }

    fn reap(&self) {
        let reaped = self.registry.reap();
        if reaped.removed > 0 {
            trace!(removed = reaped.removed, "reaped workers");
        }
        for task in reaped.leftovers {
            let core = task.core();
            let leftover = {
                let mut state = core.outputs().lock();
                let leftover = state.assigned.clone();
                state.assigned.clear();
                leftover
            };
            if leftover.is_empty() {
                continue;
            }
            warn!(
                stage = %core.stage(),
                nodeset_id = %core.nodeset_id(),
                nodes = leftover.len(),
                "worker ended without classifying its nodes"
            );
            self.queue.push(Transition::from_stage(
                core.stage().clone(),
                Outcome::Failed,
                leftover,
                core.nodeset_id(),
                core.context().clone(),
            ));
        }
    }

    async fn watchdog(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.watchdog_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.reap();
        }
    }

    /// Normal completion, run by the coordinator.
    async fn complete(&self) {
        if !self.lifecycle.begin_close(false) {
            return;
        }
        self.stop_watchdog();
        for mut worker in self.registry.close() {
            if tokio::time::timeout(self.settings.kill_grace(), &mut worker.handle)
                .await
                .is_err()
            {
                worker.task.kill(false).await;
                worker.handle.abort();
                worker.task.free();
            }
        }
        self.finish(events::PIPELINE_COMPLETED);
    }

    /// Teardown after an error that terminated the coordinator.
    async fn abort(&self) {
        if !self.lifecycle.begin_close(false) {
            return;
        }
        self.context.cancel_token().cancel("pipeline aborted");
        self.stop_watchdog();
        self.stop_workers(self.registry.close()).await;
        self.queue.drain().await;
        let unfinished = self.fold_unfinished();
        if !unfinished.is_empty() {
            warn!(nodes = unfinished.len(), "unfinished nodes failed by abort");
        }
        self.finish(events::PIPELINE_COMPLETED);
    }

    async fn kill(&self, grace: bool) {
        if !self.lifecycle.begin_close(true) {
            self.lifecycle.wait_finished().await;
            return;
        }
        info!(parent: &self.span, "killing pipeline");
        self.context.cancel_token().cancel("pipeline killed");

        // Closed first so the coordinator cannot launch anything new.
        let mut workers = self.registry.close();
        if grace {
            for worker in workers.iter().filter(|w| !w.handle.is_finished()) {
                worker.task.kill(true).await;
            }
            let deadline = tokio::time::Instant::now() + self.settings.kill_grace();
            for worker in &mut workers {
                if worker.handle.is_finished() {
                    continue;
                }
                if tokio::time::timeout_at(deadline, &mut worker.handle).await.is_err() {
                    break;
                }
            }
        }

        {
            let mut handles = self.handles.lock();
            if let Some(coordinator) = handles.coordinator.take() {
                coordinator.abort();
            }
            if let Some(watchdog) = handles.watchdog.take() {
                watchdog.abort();
            }
        }
        self.stop_workers(workers).await;
        let drained = self.queue.drain().await;

        let unfinished = self.fold_unfinished();
        info!(
            parent: &self.span,
            unfinished = unfinished.len(),
            drained,
            "pipeline killed"
        );
        guarded("on_kill", || self.pipeline.on_kill(&unfinished));
        self.emit(
            events::PIPELINE_KILLED,
            serde_json::json!({"nodes": unfinished.hostnames()}),
        );
        self.finish(events::PIPELINE_COMPLETED);
    }

    fn stop_watchdog(&self) {
        if let Some(watchdog) = self.handles.lock().watchdog.take() {
            watchdog.abort();
        }
    }

    async fn stop_workers(&self, workers: Vec<Worker>) {
        for worker in workers {
            if !worker.handle.is_finished() {
                worker.task.kill(false).await;
            }
            worker.handle.abort();
            worker.task.free();
        }
    }

    fn finish(&self, event_type: &str) {
        let started_at = (*self.started_at.lock()).unwrap_or_else(Utc::now);
        let (succeeded, failed, breakpointed) = self.ledger.lock().outcome_sets();
        let report = PipelineReport {
            run_id: self.run_id,
            pipeline: self.pipeline.name().to_string(),
            succeeded,
            failed,
            breakpointed,
            killed: self.lifecycle.is_killed(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            parent: &self.span,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            breakpointed = report.breakpointed.len(),
            killed = report.killed,
            duration_ms = report.duration_ms(),
            "pipeline done"
        );
        if self.announced.load(Ordering::SeqCst) {
            guarded("on_done", || self.pipeline.on_done(&report));
        }
        self.emit(event_type, report.to_json());

        *self.report.lock() = Some(report);
        self.lifecycle.mark_finished();
    }

    fn outcome(&self) -> ScheduleResult<PipelineReport> {
        let report = self
            .report
            .lock()
            .clone()
            .ok_or_else(|| ScheduleError::coordinator("pipeline finished without a report"))?;
        let error = self.ledger.lock().error();
        match error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

fn guarded(hook: &str, f: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(hook, message = %panic_message(panic.as_ref()), "pipeline hook panicked");
    }
}
