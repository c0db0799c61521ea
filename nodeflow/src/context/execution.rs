//! Execution context threaded through every task construction.

use super::NodesetIdCounter;
use crate::cancellation::CancellationToken;
use crate::manager::WorkQueue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Back-reference from a task to the manager that dispatched it.
///
/// A nested manager uses it to push its terminal classifications onto the
/// outer manager's queue.
#[derive(Clone)]
pub struct OuterLink {
    /// Run id of the dispatching manager.
    pub run_id: Uuid,
    /// Pipeline name of the dispatching manager.
    pub pipeline: String,
    /// The dispatching manager's work queue.
    pub queue: WorkQueue,
}

impl fmt::Debug for OuterLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OuterLink")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Per-message execution context.
///
/// Cloned for every follow-up message, so mutating one task's context never
/// affects a sibling subset. The nodeset-id counter and cancellation token are
/// shared handles; the retry counter and domain data are per-copy values.
#[derive(Clone)]
pub struct ExecutionContext {
    counter: NodesetIdCounter,
    cancel: Arc<CancellationToken>,
    retries: u32,
    outer: Option<OuterLink>,
    data: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Creates a context with a fresh counter and token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_counter(NodesetIdCounter::new())
    }

    /// Creates a context sharing an existing counter.
    #[must_use]
    pub fn with_counter(counter: NodesetIdCounter) -> Self {
        Self {
            counter,
            cancel: CancellationToken::new(),
            retries: 0,
            outer: None,
            data: HashMap::new(),
        }
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Detaches the nodeset-id counter from its siblings.
    #[must_use]
    pub fn with_private_counter(mut self) -> Self {
        self.counter = self.counter.fork();
        self
    }

    /// Sets the back-reference to the dispatching manager.
    #[must_use]
    pub fn with_outer(mut self, outer: OuterLink) -> Self {
        self.outer = Some(outer);
        self
    }

    /// Adds a domain value.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the shared nodeset-id counter.
    #[must_use]
    pub fn counter(&self) -> &NodesetIdCounter {
        &self.counter
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns true once the owning manager is being killed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the number of retries already spent on the current attempt.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Records one more retry.
    pub fn increment_retries(&mut self) {
        self.retries += 1;
    }

    /// Resets the retry counter for a new stage or implementation.
    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }

    /// Returns the back-reference to the dispatching manager.
    #[must_use]
    pub fn outer(&self) -> Option<&OuterLink> {
        self.outer.as_ref()
    }

    /// Returns a domain value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Stores a domain value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Returns all domain values.
    #[must_use]
    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("next_nodeset_id", &self.counter.peek())
            .field("retries", &self.retries)
            .field("cancelled", &self.is_cancelled())
            .field("outer", &self.outer)
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_isolates_retries_and_data() {
        let mut ctx = ExecutionContext::new().with_data("environment", serde_json::json!("debian12"));
        let mut copy = ctx.clone();

        copy.increment_retries();
        copy.insert("environment", serde_json::json!("centos9"));

        assert_eq!(ctx.retries(), 0);
        assert_eq!(copy.retries(), 1);
        assert_eq!(ctx.get("environment"), Some(&serde_json::json!("debian12")));

        ctx.increment_retries();
        ctx.reset_retries();
        assert_eq!(ctx.retries(), 0);
    }

    #[test]
    fn test_clone_shares_counter_and_token() {
        let ctx = ExecutionContext::new();
        let copy = ctx.clone();

        copy.counter().next_id();
        assert_eq!(ctx.counter().peek().get(), 1);

        ctx.cancel_token().cancel("kill");
        assert!(copy.is_cancelled());
    }

    #[test]
    fn test_private_counter_detaches() {
        let ctx = ExecutionContext::new();
        let private = ctx.clone().with_private_counter();

        private.counter().next_id();
        assert_eq!(ctx.counter().peek().get(), 0);
        assert!(!ctx.counter().shares_with(private.counter()));
    }
}
