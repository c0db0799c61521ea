//! # Nodeflow
//!
//! A partition-aware task scheduler for bare-metal provisioning pipelines.
//!
//! An operation (deploy, reboot, set boot device, ...) is a linear table of
//! stages applied to a set of physical nodes. Nodeflow drives every node
//! through the table with support for:
//!
//! - **Partition awareness**: nodes that succeed and nodes that fail a stage
//!   split into independent subsets that proceed on their own
//! - **Retry and fallback**: bounded retries per stage, then the next
//!   implementation of the slot
//! - **Nesting**: a stage may run a whole nested table, forwarding terminal
//!   outcomes to the outer pipeline as they happen
//! - **Breakpoints, timeouts and kill**: every node still ends in exactly one
//!   of succeeded, failed or breakpointed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow::prelude::*;
//!
//! let table = StageTable::new()
//!     .stage(StageDescriptor::new("set_boot"))
//!     .fallback(vec![
//!         StageDescriptor::new("deploy_tree"),
//!         StageDescriptor::new("deploy_chain"),
//!     ])
//!     .stage(StageDescriptor::new("reboot"));
//!
//! let manager = TaskManager::builder(pipeline, nodes, table).build()?;
//! let report = manager.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod logging;
pub mod manager;
pub mod nodes;
pub mod pipeline;
pub mod tasks;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        ConfigOverrides, ManagerSettings, OperationConfig, StageConfig, StageConfigOverride,
    };
    pub use crate::context::{ExecutionContext, NodesetId, NodesetIdCounter};
    pub use crate::errors::{ConfigError, ScheduleError, ScheduleResult};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::manager::{Outcome, PipelineReport, TaskManager, TaskedTaskManager};
    pub use crate::nodes::{Node, NodeSet};
    pub use crate::pipeline::{
        Pipeline, RetryKind, SplitReport, StageBinding, StageDescriptor, StageNodes,
        StageTable,
    };
    pub use crate::tasks::{Task, TaskCore, TaskOutputs};
}
