//! Mutation-aware node set.

use super::Node;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// A set of node handles flowing through a pipeline together.
///
/// Every set has an identity. A [`NodeSet::linked_copy`] records the identity
/// of the set it was copied from, so a holder can later tell which sets were
/// derived from one another and release them with [`NodeSet::free`].
///
/// Equality compares membership only.
#[derive(Clone)]
pub struct NodeSet {
    id: Uuid,
    origin: Option<Uuid>,
    nodes: BTreeSet<Node>,
}

impl NodeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: None,
            nodes: BTreeSet::new(),
        }
    }

    /// Creates a set from existing node handles.
    #[must_use]
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut set = Self::new();
        set.nodes.extend(nodes);
        set
    }

    /// Creates a set of fresh handles from hostnames.
    #[must_use]
    pub fn from_hosts<S: AsRef<str>>(hosts: impl IntoIterator<Item = S>) -> Self {
        Self::from_nodes(hosts.into_iter().map(|h| Node::new(h.as_ref())))
    }

    /// Returns the identity of this set.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the identity of the set this one was linked from.
    #[must_use]
    pub fn origin(&self) -> Option<Uuid> {
        self.origin
    }

    /// Returns true if this set was linked from `other`.
    #[must_use]
    pub fn is_linked_to(&self, other: &Self) -> bool {
        self.origin == Some(other.id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the set holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the node is a member.
    #[must_use]
    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.contains(node)
    }

    /// Returns the member with this hostname.
    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname() == hostname)
    }

    /// Adds a node, returning false if it was already present.
    pub fn add(&mut self, node: Node) -> bool {
        self.nodes.insert(node)
    }

    /// Removes a node, returning false if it was absent.
    pub fn remove(&mut self, node: &Node) -> bool {
        self.nodes.remove(node)
    }

    /// Adds every member of `other`.
    pub fn extend(&mut self, other: &Self) {
        self.nodes.extend(other.nodes.iter().cloned());
    }

    /// Removes every member of `other`.
    pub fn remove_all(&mut self, other: &Self) {
        for node in &other.nodes {
            self.nodes.remove(node);
        }
    }

    /// Returns the members of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self::from_nodes(self.nodes.difference(&other.nodes).cloned())
    }

    /// Returns the members present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self::from_nodes(self.nodes.intersection(&other.nodes).cloned())
    }

    /// Returns true if every member of `other` is in `self`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        other.nodes.is_subset(&self.nodes)
    }

    /// Duplicates membership into a new set linked back to this one.
    ///
    /// The copy shares the node handles, so records written on its nodes are
    /// visible through the source set.
    #[must_use]
    pub fn linked_copy(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: Some(self.id),
            nodes: self.nodes.clone(),
        }
    }

    /// Empties the set and drops its link.
    pub fn free(&mut self) {
        self.nodes.clear();
        self.origin = None;
    }

    /// Removes all members, keeping the link.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Returns true if both sets hold exactly the same nodes.
    #[must_use]
    pub fn same_members(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }

    /// Iterates members in hostname order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Returns the hostnames in order.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.hostname().to_string()).collect()
    }
}

impl Default for NodeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for NodeSet {
    fn eq(&self, other: &Self) -> bool {
        self.same_members(other)
    }
}

impl Eq for NodeSet {}

impl FromIterator<Node> for NodeSet {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        Self::from_nodes(iter)
    }
}

impl fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSet")
            .field("len", &self.nodes.len())
            .field("nodes", &self.hostnames())
            .finish()
    }
}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostnames().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> NodeSet {
        NodeSet::from_hosts(names.iter().copied())
    }

    #[test]
    fn test_add_remove_contains() {
        let mut set = NodeSet::new();
        assert!(set.is_empty());

        let node = Node::new("n1");
        assert!(set.add(node.clone()));
        assert!(!set.add(node.clone()));
        assert!(set.contains(&node));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&node));
        assert!(!set.remove(&node));
        assert!(set.is_empty());
    }

    #[test]
    fn test_difference_and_intersection() {
        let a = hosts(&["n1", "n2", "n3"]);
        let b = hosts(&["n2", "n4"]);

        assert_eq!(a.difference(&b).hostnames(), vec!["n1", "n3"]);
        assert_eq!(a.intersection(&b).hostnames(), vec!["n2"]);
        assert!(a.covers(&hosts(&["n1", "n3"])));
        assert!(!a.covers(&b));
    }

    #[test]
    fn test_linked_copy_tracks_origin() {
        let source = hosts(&["n1", "n2"]);
        let mut copy = source.linked_copy();

        assert!(copy.is_linked_to(&source));
        assert!(!source.is_linked_to(&copy));
        assert_ne!(copy.id(), source.id());
        assert!(copy.same_members(&source));

        copy.free();
        assert!(copy.is_empty());
        assert!(copy.origin().is_none());
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_linked_copy_shares_handles() {
        let source = hosts(&["n1"]);
        let copy = source.linked_copy();

        let node = copy.get("n1").unwrap();
        node.set_record(crate::nodes::NodeRecord {
            stage: "power_on".to_string(),
            position: 0,
            sub_position: 0,
            nodeset_id: crate::context::NodesetId::new(1),
            outcome: crate::manager::Outcome::Succeeded,
        });

        assert!(source.get("n1").unwrap().record().is_some());
    }

    #[test]
    fn test_equality_is_membership() {
        let a = hosts(&["n2", "n1"]);
        let b = hosts(&["n1", "n2"]);
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.to_string(), "n1,n2");
    }

    #[test]
    fn test_remove_all_and_extend() {
        let mut a = hosts(&["n1", "n2", "n3"]);
        a.remove_all(&hosts(&["n1", "n3"]));
        assert_eq!(a.hostnames(), vec!["n2"]);

        a.extend(&hosts(&["n5"]));
        assert_eq!(a.len(), 2);

        a.clear();
        assert!(a.is_empty());
    }
}
