//! Error types for the nodeflow scheduler.
//!
//! Two families live here. [`ConfigError`] covers everything detected while
//! loading and resolving an operation's configuration, before any task runs.
//! [`ScheduleError`] covers failures observed while a pipeline executes.
//!
//! Node-level failures are not errors: a stage that fails some nodes reports
//! them through its output sets and the retry/fallback policy takes over.

use crate::context::NodesetId;
use thiserror::Error;

/// Result alias used throughout the scheduler.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A stage name does not appear in the stage table.
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// A substage name does not appear in the nested table of its stage.
    #[error("unknown substage '{substage}' in stage '{stage}'")]
    UnknownSubstage {
        /// The enclosing stage.
        stage: String,
        /// The substage that could not be found.
        substage: String,
    },

    /// A breakpoint request does not match `stage[:substage]`.
    #[error("malformed breakpoint '{0}', expected stage[:substage]")]
    MalformedBreakpoint(String),

    /// The stage table violates one of its invariants.
    #[error("invalid stage table: {0}")]
    InvalidTable(String),

    /// The configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Rebuilds an equivalent error. Wrapped library errors keep their
    /// message and kind.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::UnknownStage(stage) => Self::UnknownStage(stage.clone()),
            Self::UnknownSubstage { stage, substage } => Self::UnknownSubstage {
                stage: stage.clone(),
                substage: substage.clone(),
            },
            Self::MalformedBreakpoint(raw) => Self::MalformedBreakpoint(raw.clone()),
            Self::InvalidTable(reason) => Self::InvalidTable(reason.clone()),
            Self::Parse(e) => Self::Parse(serde::de::Error::custom(e.to_string())),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Errors raised while a pipeline executes.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Configuration rejected while building a manager.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stage logic returned an error.
    #[error("stage logic error: {0}")]
    Task(#[from] anyhow::Error),

    /// Stage logic panicked.
    #[error("stage '{stage}' panicked: {message}")]
    Panicked {
        /// The stage whose task panicked.
        stage: String,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// The pipeline factory could not build a task.
    #[error("task factory failed for stage '{stage}': {message}")]
    Factory {
        /// The stage the factory was asked for.
        stage: String,
        /// Why construction failed.
        message: String,
    },

    /// A nested pipeline terminated with an error.
    #[error("nested pipeline '{stage}' aborted: {source}")]
    Nested {
        /// The outer stage slot the nested pipeline occupied.
        stage: String,
        /// The inner error.
        #[source]
        source: Box<ScheduleError>,
    },

    /// The scheduling loop itself failed.
    #[error("coordinator failed: {0}")]
    Coordinator(String),

    /// A stage logic error, tagged with where it happened.
    ///
    /// Produced by the manager when it reports a deferred error to its caller.
    #[error("stage '{stage}' failed on nodeset #{nodeset_id}: {source}")]
    Stage {
        /// The stage name.
        stage: String,
        /// The nodeset the failing task was bound to.
        nodeset_id: NodesetId,
        /// The underlying error.
        #[source]
        source: Box<ScheduleError>,
    },
}

impl ScheduleError {
    /// Creates a factory error.
    #[must_use]
    pub fn factory(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Factory {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a coordinator error.
    #[must_use]
    pub fn coordinator(message: impl Into<String>) -> Self {
        Self::Coordinator(message.into())
    }

    /// Wraps an error raised by a nested pipeline.
    #[must_use]
    pub fn nested(stage: impl Into<String>, source: Self) -> Self {
        Self::Nested {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Rebuilds an equivalent error, so a stored error can be handed to
    /// every caller waiting on the same manager.
    ///
    /// A wrapped `anyhow` error keeps its whole context chain as its message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Config(e) => Self::Config(e.duplicate()),
            Self::Task(e) => Self::Task(anyhow::anyhow!("{e:#}")),
            Self::Panicked { stage, message } => Self::Panicked {
                stage: stage.clone(),
                message: message.clone(),
            },
            Self::Factory { stage, message } => Self::factory(stage.clone(), message.clone()),
            Self::Nested { stage, source } => Self::nested(stage.clone(), source.duplicate()),
            Self::Coordinator(message) => Self::Coordinator(message.clone()),
            Self::Stage {
                stage,
                nodeset_id,
                source,
            } => Self::Stage {
                stage: stage.clone(),
                nodeset_id: *nodeset_id,
                source: Box::new(source.duplicate()),
            },
        }
    }

    /// Returns true if this error must terminate the coordinator.
    ///
    /// Stage logic errors and panics are accounted as failed nodes and
    /// reported once the pipeline is torn down; everything else stops the
    /// scheduling loop immediately.
    #[must_use]
    pub fn is_manager_level(&self) -> bool {
        match self {
            Self::Task(_) | Self::Panicked { .. } => false,
            Self::Stage { source, .. } => source.is_manager_level(),
            Self::Config(_) | Self::Factory { .. } | Self::Nested { .. } | Self::Coordinator(_) => {
                true
            }
        }
    }
}
