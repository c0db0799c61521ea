//! Pipeline definition: stage tables, the task factory and hooks.
//!
//! A pipeline is linear. Each position holds one stage or a bounded fallback
//! chain, and any descriptor may carry a nested table run by a nested
//! manager in its slot.

mod definition;
mod hooks;
mod table;

pub use definition::{Pipeline, StageBinding};
pub use hooks::{RetryKind, SplitReport, StageNodes};
pub use table::{StageDescriptor, StageEntry, StageRef, StageTable};
