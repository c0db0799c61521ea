//! Testing utilities for nodeflow pipelines.
//!
//! This module provides:
//! - Scripted tasks whose node outcomes are set per attempt
//! - A scripted pipeline that records every hook call

mod fixtures;
mod mocks;

pub use fixtures::{HookCall, HookLog, ScriptedPipeline, ScriptedPipelineBuilder};
pub use mocks::{NodeOutcome, RunResult, ScriptedTask, StageScript};

use crate::nodes::NodeSet;

/// Creates `count` nodes named `{prefix}01`, `{prefix}02`, ...
#[must_use]
pub fn numbered_nodes(prefix: &str, count: usize) -> NodeSet {
    NodeSet::from_hosts((1..=count).map(|i| format!("{prefix}{i:02}")))
}
