//! Scheduler events.
//!
//! A manager reports what it does to an [`EventSink`] next to every hook
//! invocation. Event types are the constants below; payloads are JSON
//! objects carrying the run id, the stage identity, the nodeset id and the
//! host names involved.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// The manager started driving its universe.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every node reached a terminal state.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// The manager was killed.
pub const PIPELINE_KILLED: &str = "pipeline.killed";
/// A task was created and launched.
pub const STAGE_DISPATCHED: &str = "stage.dispatched";
/// Failed nodes are retried with the same implementation.
pub const STAGE_RETRY: &str = "stage.retry";
/// Failed nodes move to the next implementation of their slot.
pub const STAGE_FALLBACK: &str = "stage.fallback";
/// A task exceeded its stage timeout.
pub const STAGE_TIMEOUT: &str = "stage.timeout";
/// Nodes reached a breakpointed stage.
pub const STAGE_BREAKPOINT: &str = "stage.breakpoint";
/// Stage logic returned an error or panicked.
pub const STAGE_ERROR: &str = "stage.error";
/// One attempt forked its nodeset.
pub const NODESET_SPLIT: &str = "nodeset.split";
/// Nodes finished the pipeline successfully.
pub const NODES_SUCCEEDED: &str = "nodes.succeeded";
/// Nodes failed terminally.
pub const NODES_FAILED: &str = "nodes.failed";
/// Nodes halted at a breakpoint.
pub const NODES_BREAKPOINTED: &str = "nodes.breakpointed";
/// A nested pipeline forwarded nodes to its embedding pipeline.
pub const NODES_RAISED: &str = "nodes.raised";
