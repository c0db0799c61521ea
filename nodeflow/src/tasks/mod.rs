//! Tasks: one stage execution bound to one node subset.

mod outputs;
mod task;

pub use outputs::{TaskOutputs, TaskState};
pub use task::{Task, TaskCore};
