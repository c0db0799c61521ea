//! Exactly-once accounting of terminal nodes.

use super::Outcome;
use crate::context::NodesetId;
use crate::errors::ScheduleError;
use crate::nodes::NodeSet;
use crate::pipeline::StageRef;
use std::collections::HashMap;

/// The manager's authoritative view of which nodes are done and how.
///
/// Every write goes through [`Ledger::record`] or [`Ledger::fold_unfinished`],
/// both of which skip nodes already done, so a node lands in exactly one
/// outcome set even when a kill races the coordinator.
#[derive(Debug)]
pub(crate) struct Ledger {
    universe: NodeSet,
    done: NodeSet,
    succeeded: NodeSet,
    failed: NodeSet,
    breakpointed: NodeSet,
    /// Last stage each node was dispatched to, keyed by hostname.
    whereabouts: HashMap<String, (StageRef, NodesetId)>,
    fatal: Option<ScheduleError>,
    deferred: Option<ScheduleError>,
}

impl Ledger {
    pub(crate) fn new(universe: NodeSet) -> Self {
        Self {
            universe,
            done: NodeSet::new(),
            succeeded: NodeSet::new(),
            failed: NodeSet::new(),
            breakpointed: NodeSet::new(),
            whereabouts: HashMap::new(),
            fatal: None,
            deferred: None,
        }
    }

    pub(crate) fn universe(&self) -> &NodeSet {
        &self.universe
    }

    pub(crate) fn done(&self) -> &NodeSet {
        &self.done
    }

    /// Returns the members of `nodes` that belong to the universe and are
    /// not done yet.
    pub(crate) fn available(&self, nodes: &NodeSet) -> NodeSet {
        nodes.intersection(&self.universe).difference(&self.done)
    }

    /// Records `nodes` as terminal and returns the ones actually recorded.
    pub(crate) fn record(&mut self, outcome: Outcome, nodes: &NodeSet) -> NodeSet {
        let fresh = self.available(nodes);
        self.done.extend(&fresh);
        match outcome {
            Outcome::Succeeded => self.succeeded.extend(&fresh),
            Outcome::Failed => self.failed.extend(&fresh),
            Outcome::Breakpointed => self.breakpointed.extend(&fresh),
        }
        fresh
    }

    /// Notes that `nodes` were handed to `stage` under `nodeset_id`.
    pub(crate) fn track(&mut self, stage: &StageRef, nodes: &NodeSet, nodeset_id: NodesetId) {
        for node in nodes.iter() {
            self.whereabouts
                .insert(node.hostname().to_string(), (stage.clone(), nodeset_id));
        }
    }

    pub(crate) fn last_seen(&self, hostname: &str) -> Option<&(StageRef, NodesetId)> {
        self.whereabouts.get(hostname)
    }

    /// Fails every node not done yet and returns them.
    pub(crate) fn fold_unfinished(&mut self) -> NodeSet {
        let universe = self.universe.clone();
        self.record(Outcome::Failed, &universe)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.done.covers(&self.universe)
    }

    pub(crate) fn outcome_sets(&self) -> (NodeSet, NodeSet, NodeSet) {
        (
            self.succeeded.clone(),
            self.failed.clone(),
            self.breakpointed.clone(),
        )
    }

    /// Keeps the first error that must stop the coordinator.
    pub(crate) fn set_fatal(&mut self, error: ScheduleError) {
        self.fatal.get_or_insert(error);
    }

    /// Keeps the first stage error, reported after teardown.
    pub(crate) fn set_deferred(&mut self, error: ScheduleError) {
        self.deferred.get_or_insert(error);
    }

    pub(crate) fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// The error the run reports, fatal first. Stays stored, so every
    /// caller gets its own copy.
    pub(crate) fn error(&self) -> Option<ScheduleError> {
        self.fatal
            .as_ref()
            .or(self.deferred.as_ref())
            .map(ScheduleError::duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_exactly_once() {
        let universe = NodeSet::from_hosts(["n1", "n2", "n3"]);
        let mut ledger = Ledger::new(universe.clone());

        let recorded = ledger.record(Outcome::Succeeded, &NodeSet::from_hosts(["n1", "n9"]));
        assert_eq!(recorded.hostnames(), vec!["n1"]);

        let recorded = ledger.record(Outcome::Failed, &NodeSet::from_hosts(["n1", "n2"]));
        assert_eq!(recorded.hostnames(), vec!["n2"]);

        let (succeeded, failed, _) = ledger.outcome_sets();
        assert_eq!(succeeded.hostnames(), vec!["n1"]);
        assert_eq!(failed.hostnames(), vec!["n2"]);
        assert!(!ledger.is_complete());

        let folded = ledger.fold_unfinished();
        assert_eq!(folded.hostnames(), vec!["n3"]);
        assert!(ledger.is_complete());
        assert!(ledger.done().same_members(ledger.universe()));
    }

    #[test]
    fn test_tracks_last_dispatch() {
        let mut ledger = Ledger::new(NodeSet::from_hosts(["n1", "n2"]));
        let stage = |name: &str, position| StageRef {
            name: name.to_string(),
            position,
            sub_position: 0,
        };
        ledger.track(&stage("set_boot", 0), &NodeSet::from_hosts(["n1", "n2"]), NodesetId::new(0));
        ledger.track(&stage("untar", 1), &NodeSet::from_hosts(["n2"]), NodesetId::new(3));

        let (at, id) = ledger.last_seen("n2").unwrap();
        assert_eq!((at.name.as_str(), *id), ("untar", NodesetId::new(3)));
        assert_eq!(ledger.last_seen("n1").unwrap().0.name, "set_boot");
        assert!(ledger.last_seen("n9").is_none());
    }

    #[test]
    fn test_available_filters_done_and_foreign() {
        let mut ledger = Ledger::new(NodeSet::from_hosts(["n1", "n2"]));
        ledger.record(Outcome::Breakpointed, &NodeSet::from_hosts(["n1"]));
        let available = ledger.available(&NodeSet::from_hosts(["n1", "n2", "n3"]));
        assert_eq!(available.hostnames(), vec!["n2"]);
    }

    #[test]
    fn test_fatal_wins_over_deferred() {
        let mut ledger = Ledger::new(NodeSet::new());
        assert!(ledger.is_complete());

        ledger.set_deferred(ScheduleError::from(anyhow::anyhow!("first")));
        ledger.set_deferred(ScheduleError::from(anyhow::anyhow!("second")));
        ledger.set_fatal(ScheduleError::coordinator("queue closed"));
        assert!(ledger.has_fatal());

        assert!(matches!(ledger.error(), Some(ScheduleError::Coordinator(_))));
        assert!(matches!(ledger.error(), Some(ScheduleError::Coordinator(_))));

        let mut ledger = Ledger::new(NodeSet::new());
        assert!(ledger.error().is_none());
        ledger.set_deferred(ScheduleError::from(anyhow::anyhow!("first")));
        ledger.set_deferred(ScheduleError::from(anyhow::anyhow!("second")));
        assert!(ledger.error().unwrap().to_string().contains("first"));
    }
}
