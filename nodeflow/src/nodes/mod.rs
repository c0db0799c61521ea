//! Node identities and node sets.
//!
//! The scheduler never creates node identities on its own; it only partitions
//! and forwards the handles it was given.

mod node;
mod set;

pub use node::{Node, NodeRecord};
pub use set::NodeSet;
