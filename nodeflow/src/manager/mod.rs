//! The scheduling engine.
//!
//! A [`TaskManager`] owns a node universe and a stage table. Its coordinator
//! pops transitions off a [`WorkQueue`], applies the retry and fallback
//! policy, and dispatches one task per node subset. Workers classify their
//! nodes and push the follow-up transitions back; the manager finishes once
//! every node is succeeded, failed or breakpointed.
//!
//! A [`TaskedTaskManager`] wraps a manager so a whole nested table occupies
//! one stage slot of an outer pipeline.

mod core;
mod ledger;
mod lifecycle;
mod queue;
mod report;
mod tasked;
mod worker;
mod workers;


pub use self::core::{TaskManager, TaskManagerBuilder};
pub use queue::{Outcome, Transition, TransitionSource, WorkQueue};
pub use report::PipelineReport;
pub use tasked::{TaskedTaskManager, TaskedTaskManagerBuilder};
pub use workers::WorkerRegistry;
