//! Stage configuration, override cascading and operation loading.
//!
//! Configuration is resolved once, when a manager is built: every stage name
//! of the table gets a [`StageConfig`], breakpoint requests are turned into
//! coordinates, and unknown names are rejected before any task runs.

mod breakpoint;
mod loader;
mod stage;

pub use breakpoint::{BreakpointRequest, BreakpointTarget, SubstageTarget};
pub use loader::{ManagerSettings, OperationConfig, ResolvedOperation};
pub use stage::{ConfigOverrides, StageConfig, StageConfigMap, StageConfigOverride};
