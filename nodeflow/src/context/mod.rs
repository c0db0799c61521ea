//! Execution context for pipeline runs.
//!
//! This module provides:
//! - Nodeset identifiers and their shared counter
//! - The per-message execution context handed to every task

mod counter;
mod execution;

pub use counter::{NodesetId, NodesetIdCounter};
pub use execution::{ExecutionContext, OuterLink};
