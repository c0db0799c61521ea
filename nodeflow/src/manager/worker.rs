//! One worker: runs a task under its stage timeout and classifies its nodes.

use super::core::Shared;
use super::queue::{Outcome, Transition};
use crate::errors::ScheduleError;
use crate::events;
use crate::nodes::NodeSet;
use crate::pipeline::{SplitReport, StageNodes};
use crate::tasks::{Task, TaskCore};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How one attempt ended, as far as node accounting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Completed(bool),
    TimedOut,
    Errored,
}

impl Attempt {
    fn succeeded(self) -> bool {
        self == Self::Completed(true)
    }
}

pub(crate) async fn run_worker(shared: Arc<Shared>, task: Arc<dyn Task>) {
    let core = task.core();
    let run = AssertUnwindSafe(task.run()).catch_unwind();
    let result = match core.config().timeout() {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => Some(result),
            Err(_) => None,
        },
        None => Some(run.await),
    };

    let attempt = match result {
        None => {
            warn!(
                stage = %core.stage(),
                nodeset_id = %core.nodeset_id(),
                timeout_secs = core.config().timeout_secs,
                "stage timed out"
            );
            task.kill(false).await;
            task.free();
            Attempt::TimedOut
        }
        Some(Ok(Ok(ok))) => Attempt::Completed(ok),
        Some(Ok(Err(e))) => {
            stage_error(&shared, core, e);
            Attempt::Errored
        }
        Some(Err(panic)) => {
            let error = ScheduleError::Panicked {
                stage: core.stage().name.clone(),
                message: panic_message(panic.as_ref()),
            };
            stage_error(&shared, core, error);
            Attempt::Errored
        }
    };

    classify(&shared, core, attempt);
}

fn stage_error(shared: &Shared, core: &TaskCore, error: ScheduleError) {
    if error.is_manager_level() {
        error!(stage = %core.stage(), error = %error, "stage raised a manager-level error");
        // Recorded before the abort so a coordinator that already completed
        // still reports it.
        shared.record_fatal(error);
        shared.queue.abort(ScheduleError::coordinator(format!(
            "stage '{}' aborted the pipeline",
            core.stage().name
        )));
        return;
    }

    error!(
        stage = %core.stage(),
        nodeset_id = %core.nodeset_id(),
        error = %error,
        "stage logic error"
    );
    shared.emit(
        events::STAGE_ERROR,
        serde_json::json!({
            "stage": core.stage().name,
            "nodeset_id": core.nodeset_id(),
            "error": error.to_string(),
        }),
    );
    shared.record_error(ScheduleError::Stage {
        stage: core.stage().name.clone(),
        nodeset_id: core.nodeset_id(),
        source: Box::new(error),
    });
}

/// Turns a finished attempt into follow-up messages.
///
/// Holds the task's output lock for the whole classification, hooks
/// included, so a nested manager raising nodes out of the same task cannot
/// route a node twice.
fn classify(shared: &Shared, core: &TaskCore, attempt: Attempt) {
    let stage = core.stage();
    let nodeset_id = core.nodeset_id();
    let counter = core.context().counter();
    let push = |outcome: Outcome, nodes: NodeSet, id| {
        debug!(stage = %stage, nodeset_id = %id, nodes = nodes.len(), %outcome, "classified");
        shared.queue.push(Transition::from_stage(
            stage.clone(),
            outcome,
            nodes,
            id,
            core.context().clone(),
        ));
    };

    let mut state = core.outputs().lock();
    let remaining = state.assigned.clone();
    if remaining.is_empty() {
        return;
    }

    let mut split = None;
    if attempt.succeeded() {
        let failed = remaining.intersection(&state.failed);
        let breakpointed = remaining.intersection(&state.breakpointed).difference(&failed);
        let succeeded = remaining
            .intersection(&state.succeeded)
            .difference(&failed)
            .difference(&breakpointed);
        let failed = remaining.difference(&succeeded).difference(&breakpointed);

        if !breakpointed.is_empty() {
            let id = if succeeded.is_empty() && failed.is_empty() {
                nodeset_id
            } else {
                counter.next_id()
            };
            push(Outcome::Breakpointed, breakpointed, id);
        }

        match (succeeded.is_empty(), failed.is_empty()) {
            (false, false) => {
                let (succeeded_id, failed_id) = counter.split();
                push(Outcome::Succeeded, succeeded.clone(), succeeded_id);
                push(Outcome::Failed, failed.clone(), failed_id);
                split = Some(SplitReport {
                    stage: stage.clone(),
                    parent: nodeset_id,
                    succeeded_id,
                    succeeded,
                    failed_id,
                    failed,
                });
            }
            (false, true) => push(Outcome::Succeeded, succeeded, nodeset_id),
            (true, false) => push(Outcome::Failed, failed, nodeset_id),
            (true, true) => {}
        }
    } else {
        push(Outcome::Failed, remaining, nodeset_id);
    }
    state.assigned.clear();

    if attempt == Attempt::TimedOut {
        let at = StageNodes {
            stage,
            nodes: core.nodes(),
            nodeset_id,
        };
        shared.pipeline.on_timeout(&at);
        shared.emit(
            events::STAGE_TIMEOUT,
            serde_json::json!({
                "stage": stage.name,
                "nodeset_id": nodeset_id,
                "nodes": core.nodes().hostnames(),
                "timeout_secs": core.config().timeout_secs,
            }),
        );
    }

    if let Some(split) = split {
        debug!(
            stage = %stage,
            parent = %split.parent,
            succeeded_id = %split.succeeded_id,
            failed_id = %split.failed_id,
            succeeded = split.succeeded.len(),
            failed = split.failed.len(),
            "nodeset split"
        );
        shared.pipeline.on_split(&split);
        shared.emit(
            events::NODESET_SPLIT,
            serde_json::json!({
                "stage": stage.name,
                "parent": split.parent,
                "succeeded_id": split.succeeded_id,
                "succeeded": split.succeeded.hostnames(),
                "failed_id": split.failed_id,
                "failed": split.failed.hostnames(),
            }),
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("disk gone"));
        assert_eq!(panic_message(payload.as_ref()), "disk gone");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_only_true_completion_succeeds() {
        assert!(Attempt::Completed(true).succeeded());
        assert!(!Attempt::Completed(false).succeeded());
        assert!(!Attempt::TimedOut.succeeded());
        assert!(!Attempt::Errored.succeeded());
    }
}
