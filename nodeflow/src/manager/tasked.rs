//! A task manager that occupies one stage slot of an outer pipeline.

use super::core::RaiseTarget;
use super::{PipelineReport, TaskManager};
use crate::config::{ConfigOverrides, ManagerSettings};
use crate::errors::{ScheduleError, ScheduleResult};
use crate::events::EventSink;
use crate::pipeline::{Pipeline, StageBinding, StageTable};
use crate::tasks::{Task, TaskCore};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builder for [`TaskedTaskManager`].
pub struct TaskedTaskManagerBuilder {
    core: TaskCore,
    stages: StageTable,
    pipeline: Arc<dyn Pipeline>,
    overrides: ConfigOverrides,
    settings: ManagerSettings,
    events: Option<Arc<dyn EventSink>>,
    private_counter: bool,
}

impl TaskedTaskManagerBuilder {
    /// Merges overrides for the nested table on top of the ones carried by
    /// the binding. The later override wins per field.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides.merge(&overrides);
        self
    }

    /// Sets the nested manager's timing.
    #[must_use]
    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the nested manager's event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Gives the nested manager its own nodeset-id counter instead of
    /// sharing the outer one.
    #[must_use]
    pub fn with_private_counter(mut self) -> Self {
        self.private_counter = true;
        self
    }

    /// Builds the nested manager.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::Config` when the nested table or its overrides
    /// are invalid.
    pub fn build(self) -> ScheduleResult<TaskedTaskManager> {
        let outer = self.core.context();
        let mut context = outer
            .clone()
            .with_cancel_token(outer.cancel_token().child());
        context.reset_retries();
        if self.private_counter {
            context = context.with_private_counter();
        }

        let raise = outer.outer().map(|link| RaiseTarget {
            outer: link.clone(),
            stage: self.core.stage().clone(),
            nodes: self.core.nodes().clone(),
            nodeset_id: self.core.nodeset_id(),
            context: outer.clone(),
            outputs: Arc::clone(self.core.outputs()),
        });

        let mut builder = TaskManager::builder(self.pipeline, self.core.nodes().clone(), self.stages)
            .with_overrides(self.overrides)
            .with_settings(self.settings)
            .with_context(context)
            .with_nodeset_id(self.core.nodeset_id())
            .with_raise(raise);
        if let Some(events) = self.events {
            builder = builder.with_event_sink(events);
        }

        Ok(TaskedTaskManager {
            inner: builder.build()?,
            core: self.core,
        })
    }
}

/// A [`TaskManager`] driving a nested stage table for the nodes of one outer
/// task.
///
/// Terminal outcomes of raisable inner stages are pushed onto the outer
/// manager's queue as they happen. Whatever is left when the inner run ends
/// is classified by the outer manager like any task's outputs.
pub struct TaskedTaskManager {
    core: TaskCore,
    inner: TaskManager,
}

impl TaskedTaskManager {
    /// Starts a builder for a nested manager running `stages`.
    #[must_use]
    pub fn builder(
        core: TaskCore,
        stages: StageTable,
        pipeline: Arc<dyn Pipeline>,
    ) -> TaskedTaskManagerBuilder {
        TaskedTaskManagerBuilder {
            core,
            stages,
            pipeline,
            overrides: ConfigOverrides::default(),
            settings: ManagerSettings::default(),
            events: None,
            private_counter: false,
        }
    }

    /// Starts a builder from a factory binding, using the descriptor's
    /// substages, the nested overrides and the dispatching manager's timing.
    ///
    /// # Errors
    ///
    /// Returns a factory error when the descriptor has no nested table.
    pub fn from_binding(
        core: TaskCore,
        binding: &StageBinding<'_>,
        pipeline: Arc<dyn Pipeline>,
    ) -> ScheduleResult<TaskedTaskManagerBuilder> {
        let stages = binding.descriptor.substages.clone().ok_or_else(|| {
            ScheduleError::factory(&binding.descriptor.name, "stage has no nested table")
        })?;
        Ok(Self::builder(core, stages, pipeline)
            .with_overrides(binding.nested_overrides.clone())
            .with_settings(binding.settings.clone()))
    }

    /// Returns the nested manager.
    #[must_use]
    pub fn inner(&self) -> &TaskManager {
        &self.inner
    }

    /// Copies the inner outcome of nodes still assigned into the outputs.
    fn absorb(&self, report: &PipelineReport) {
        let mut state = self.core.outputs().lock();
        let succeeded = report.succeeded.intersection(&state.assigned);
        let failed = report.failed.intersection(&state.assigned);
        let breakpointed = report.breakpointed.intersection(&state.assigned);
        state.succeeded.extend(&succeeded);
        state.failed.extend(&failed);
        state.breakpointed.extend(&breakpointed);
    }
}

#[async_trait]
impl Task for TaskedTaskManager {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    async fn run(&self) -> ScheduleResult<bool> {
        let report = self
            .inner
            .run()
            .await
            .map_err(|e| ScheduleError::nested(&self.core.stage().name, e))?;
        self.absorb(&report);
        Ok(!report.killed)
    }

    async fn kill(&self, graceful: bool) {
        if graceful {
            debug!(stage = %self.core.stage(), "cancelling nested pipeline");
            self.inner
                .shared
                .context
                .cancel_token()
                .cancel("outer pipeline killed");
            return;
        }

        self.inner.terminate().await;
        if let Some(report) = self.inner.report() {
            self.absorb(&report);
        }
    }
}

impl fmt::Debug for TaskedTaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskedTaskManager")
            .field("stage", self.core.stage())
            .field("nodeset_id", &self.core.nodeset_id())
            .field("inner", &self.inner)
            .finish()
    }
}
