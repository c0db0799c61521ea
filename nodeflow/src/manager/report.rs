//! Terminal summary of one manager run.

use crate::nodes::NodeSet;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// How every node of a run ended.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Run id of the manager.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Nodes that completed the last stage.
    pub succeeded: NodeSet,
    /// Nodes that failed terminally, including those folded in by a kill.
    pub failed: NodeSet,
    /// Nodes halted at a breakpoint.
    pub breakpointed: NodeSet,
    /// Whether the run was killed.
    pub killed: bool,
    /// When the coordinator started.
    pub started_at: DateTime<Utc>,
    /// When the last node was classified.
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Returns true if every node succeeded and the run was not killed.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.killed && self.failed.is_empty() && self.breakpointed.is_empty()
    }

    /// Returns the number of classified nodes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.breakpointed.len()
    }

    /// Renders the report for logs and front ends.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "pipeline": self.pipeline,
            "succeeded": self.succeeded.hostnames(),
            "failed": self.failed.hostnames(),
            "breakpointed": self.breakpointed.hostnames(),
            "killed": self.killed,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "duration_ms": self.duration_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn report() -> PipelineReport {
        let started_at = Utc::now();
        PipelineReport {
            run_id: Uuid::new_v4(),
            pipeline: "reboot".to_string(),
            succeeded: NodeSet::from_hosts(["n1", "n2"]),
            failed: NodeSet::new(),
            breakpointed: NodeSet::new(),
            killed: false,
            started_at,
            finished_at: started_at + Duration::milliseconds(1500),
        }
    }

    #[test]
    fn test_summary() {
        let mut report = report();
        assert_eq!(report.duration_ms(), 1500);
        assert!(report.all_succeeded());
        assert_eq!(report.total(), 2);

        report.failed.add(crate::nodes::Node::new("n3"));
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_to_json() {
        let json = report().to_json();
        assert_eq!(json["pipeline"], "reboot");
        assert_eq!(json["succeeded"], serde_json::json!(["n1", "n2"]));
        assert_eq!(json["duration_ms"], 1500);
    }
}
