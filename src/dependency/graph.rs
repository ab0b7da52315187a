//! In-memory dependency graph of resource identities.
//!
//! Nodes live in a single table keyed by [`NodeKey`]; edges point from a root to the
//! dependent that requires it and are kept in insertion order so graph-wide scans are
//! deterministic. Edges are never removed, only advanced through [`EdgeStatus`].
//!
//! The graph itself is not synchronized. Processors share it as a [`SharedGraph`] and
//! perform every check-and-mutate sequence inside one lock scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::node::{Identified, Node, NodeKey};

/// Dependency graph shared between the handlers of one processor
pub type SharedGraph<P> = Arc<Mutex<DependencyGraph<P>>>;

/// Satisfaction status of a root → dependent edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    /// The dependent is blocked on its root
    Unsatisfied,
    /// The dependent's materialization has been dispatched but not confirmed
    InProcess,
    /// The dependent has been materialized
    Satisfied,
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeStatus::Unsatisfied => "unsatisfied",
            EdgeStatus::InProcess => "in_process",
            EdgeStatus::Satisfied => "satisfied",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the resource behind a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Known only through a reference from another resource
    Referenced,
    /// The resource's own declaration has been discovered
    Declared,
    /// The resource exists on the backend
    Materialized,
    /// Materialization failed, or a root it depends on failed
    Failed,
}

/// Graph invariant violations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node '{key}' is not present in the dependency graph")]
    NodeNotFound { key: NodeKey },

    #[error("edge '{root}' -> '{dependent}' is not present in the dependency graph")]
    EdgeNotFound { root: NodeKey, dependent: NodeKey },

    #[error("a full node for '{key}' is already present in the dependency graph")]
    DuplicateNode { key: NodeKey },
}

#[derive(Debug, Clone)]
struct Slot<P> {
    node: Node<P>,
    state: NodeState,
}

/// A root → dependent relation and its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub root: NodeKey,
    pub dependent: NodeKey,
    pub status: EdgeStatus,
}

/// Directed graph of resources and the depends-on relations between them.
#[derive(Debug, Clone)]
pub struct DependencyGraph<P> {
    nodes: HashMap<NodeKey, Slot<P>>,
    edges: Vec<Edge>,
    edge_index: HashMap<(NodeKey, NodeKey), usize>,
}

impl<P> Default for DependencyGraph<P> {
    fn default() -> Self {
        Self { nodes: HashMap::new(), edges: Vec::new(), edge_index: HashMap::new() }
    }
}

impl<P> DependencyGraph<P>
where
    P: Identified + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph behind the lock processors share.
    pub fn shared() -> SharedGraph<P> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn get_node(&self, key: &NodeKey) -> Option<&Node<P>> {
        self.nodes.get(key).map(|slot| &slot.node)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Insert a node.
    ///
    /// A full node where a full node already exists is rejected. A placeholder never
    /// replaces an existing node. A full node over a placeholder promotes it in place,
    /// keeping its edges and state.
    pub fn add_node(&mut self, node: Node<P>) -> Result<(), GraphError> {
        let key = node.key();
        match self.nodes.get_mut(&key) {
            Some(slot) if slot.node.is_full() && node.is_full() => {
                Err(GraphError::DuplicateNode { key })
            }
            Some(slot) => {
                if node.is_full() {
                    slot.node = node;
                }
                Ok(())
            }
            None => {
                let state =
                    if node.is_full() { NodeState::Declared } else { NodeState::Referenced };
                self.nodes.insert(key, Slot { node, state });
                Ok(())
            }
        }
    }

    /// Insert or overwrite the edge `root → dependent`. Both nodes must be present.
    pub fn add_edge(
        &mut self,
        root: &NodeKey,
        dependent: &NodeKey,
        status: EdgeStatus,
    ) -> Result<(), GraphError> {
        for key in [root, dependent] {
            if !self.nodes.contains_key(key) {
                return Err(GraphError::NodeNotFound { key: key.clone() });
            }
        }

        let pair = (root.clone(), dependent.clone());
        match self.edge_index.get(&pair) {
            Some(&idx) => self.edges[idx].status = status,
            None => {
                self.edge_index.insert(pair, self.edges.len());
                self.edges.push(Edge { root: root.clone(), dependent: dependent.clone(), status });
            }
        }
        Ok(())
    }

    /// True iff every outbound edge of `key` is satisfied; vacuously true without edges.
    pub fn are_edges_satisfied(&self, key: &NodeKey) -> bool {
        self.edges
            .iter()
            .filter(|edge| &edge.root == key)
            .all(|edge| edge.status == EdgeStatus::Satisfied)
    }

    /// Snapshot of the dependents of `root` whose edge is still unsatisfied.
    pub fn find_unsatisfied_nodes(&self, root: &NodeKey) -> Vec<Node<P>> {
        self.edges
            .iter()
            .filter(|edge| &edge.root == root && edge.status == EdgeStatus::Unsatisfied)
            .filter_map(|edge| self.get_node(&edge.dependent).cloned())
            .collect()
    }

    /// Every `(root, dependent)` pair still unsatisfied, in insertion order.
    pub fn find_all_unsatisfied_edges(&self) -> Vec<(NodeKey, NodeKey)> {
        self.edges
            .iter()
            .filter(|edge| edge.status == EdgeStatus::Unsatisfied)
            .map(|edge| (edge.root.clone(), edge.dependent.clone()))
            .collect()
    }

    pub fn update_edge_status(
        &mut self,
        root: &NodeKey,
        dependent: &NodeKey,
        status: EdgeStatus,
    ) -> Result<(), GraphError> {
        let idx = self.edge_position(root, dependent)?;
        self.edges[idx].status = status;
        Ok(())
    }

    pub fn edge_status(&self, root: &NodeKey, dependent: &NodeKey) -> Option<EdgeStatus> {
        self.edge_position(root, dependent).ok().map(|idx| self.edges[idx].status)
    }

    /// Replace the node stored under each old key with the paired node.
    ///
    /// Edges incident to the old key are rewritten to the new node's key, so promoting a
    /// placeholder or demoting a processed node never loses an edge. The node state moves
    /// with the slot.
    pub fn relabel_nodes<I>(&mut self, pairs: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = (NodeKey, Node<P>)>,
    {
        for (old, new) in pairs {
            let slot = self
                .nodes
                .remove(&old)
                .ok_or_else(|| GraphError::NodeNotFound { key: old.clone() })?;
            let new_key = new.key();

            if new_key != old {
                if let Some(existing) = self.nodes.get(&new_key) {
                    if existing.node.is_full() {
                        self.nodes.insert(old, slot);
                        return Err(GraphError::DuplicateNode { key: new_key });
                    }
                }
                self.rekey_edges(&old, &new_key);
            }

            self.nodes.insert(new_key, Slot { node: new, state: slot.state });
        }
        Ok(())
    }

    pub fn node_state(&self, key: &NodeKey) -> Option<NodeState> {
        self.nodes.get(key).map(|slot| slot.state)
    }

    pub fn set_node_state(&mut self, key: &NodeKey, state: NodeState) -> Result<(), GraphError> {
        let slot = self
            .nodes
            .get_mut(key)
            .ok_or_else(|| GraphError::NodeNotFound { key: key.clone() })?;
        slot.state = state;
        Ok(())
    }

    pub fn is_materialized(&self, key: &NodeKey) -> bool {
        self.node_state(key) == Some(NodeState::Materialized)
    }

    /// Roots `dependent` waits on, in edge insertion order.
    pub fn roots_of(&self, dependent: &NodeKey) -> Vec<NodeKey> {
        self.edges
            .iter()
            .filter(|edge| &edge.dependent == dependent)
            .map(|edge| edge.root.clone())
            .collect()
    }

    /// True iff every root of `dependent` is materialized; vacuously true without edges.
    pub fn are_roots_materialized(&self, dependent: &NodeKey) -> bool {
        self.edges
            .iter()
            .filter(|edge| &edge.dependent == dependent)
            .all(|edge| self.is_materialized(&edge.root))
    }

    /// Set every edge into `dependent` to `status`.
    pub fn set_inbound_status(&mut self, dependent: &NodeKey, status: EdgeStatus) {
        for edge in self.edges.iter_mut().filter(|edge| &edge.dependent == dependent) {
            edge.status = status;
        }
    }

    /// Whether `key` still waits on a root through an unsatisfied or in-process edge.
    pub fn has_pending_inbound(&self, key: &NodeKey) -> bool {
        self.edges
            .iter()
            .any(|edge| &edge.dependent == key && edge.status != EdgeStatus::Satisfied)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn edge_position(&self, root: &NodeKey, dependent: &NodeKey) -> Result<usize, GraphError> {
        self.edge_index
            .get(&(root.clone(), dependent.clone()))
            .copied()
            .ok_or_else(|| GraphError::EdgeNotFound {
                root: root.clone(),
                dependent: dependent.clone(),
            })
    }

    /// Point every edge incident to `old` at `new`, merging edges that become identical.
    fn rekey_edges(&mut self, old: &NodeKey, new: &NodeKey) {
        let mut merged: Vec<Edge> = Vec::with_capacity(self.edges.len());
        let mut index: HashMap<(NodeKey, NodeKey), usize> =
            HashMap::with_capacity(self.edges.len());

        for mut edge in std::mem::take(&mut self.edges) {
            if &edge.root == old {
                edge.root = new.clone();
            }
            if &edge.dependent == old {
                edge.dependent = new.clone();
            }

            let pair = (edge.root.clone(), edge.dependent.clone());
            match index.get(&pair) {
                // Keep the least advanced status of the merged pair.
                Some(&idx) if status_rank(edge.status) < status_rank(merged[idx].status) => {
                    merged[idx].status = edge.status;
                }
                Some(_) => {}
                None => {
                    index.insert(pair, merged.len());
                    merged.push(edge);
                }
            }
        }

        self.edges = merged;
        self.edge_index = index;
    }
}

fn status_rank(status: EdgeStatus) -> u8 {
    match status {
        EdgeStatus::Unsatisfied => 0,
        EdgeStatus::InProcess => 1,
        EdgeStatus::Satisfied => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Res {
        path: String,
        version: u32,
    }

    impl Res {
        fn new(path: &str) -> Self {
            Self { path: path.to_string(), version: 1 }
        }
    }

    impl Identified for Res {
        fn node_key(&self) -> NodeKey {
            NodeKey::from_path(&self.path)
        }
    }

    fn key(path: &str) -> NodeKey {
        NodeKey::from_path(path)
    }

    fn graph_with_chain() -> DependencyGraph<Res> {
        let mut graph = DependencyGraph::new();
        graph.add_node(Node::placeholder(key("pki/root"))).unwrap();
        graph.add_node(Node::full(Res::new("pki_int/a"))).unwrap();
        graph.add_node(Node::full(Res::new("pki_int/b"))).unwrap();
        graph.add_edge(&key("pki/root"), &key("pki_int/a"), EdgeStatus::Unsatisfied).unwrap();
        graph.add_edge(&key("pki/root"), &key("pki_int/b"), EdgeStatus::Unsatisfied).unwrap();
        graph
    }

    #[test]
    fn test_add_node_rejects_duplicate_full_node() {
        let mut graph = DependencyGraph::new();
        graph.add_node(Node::full(Res::new("pki/root"))).unwrap();

        let err = graph.add_node(Node::full(Res::new("pki/root"))).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode { key: key("pki/root") });
    }

    #[test]
    fn test_add_placeholder_is_noop_over_existing_node() {
        let mut graph = DependencyGraph::new();
        graph.add_node(Node::full(Res::new("pki/root"))).unwrap();
        graph.add_node(Node::placeholder(key("pki/root"))).unwrap();
        graph.add_node(Node::placeholder(key("pki/root"))).unwrap();

        assert!(graph.get_node(&key("pki/root")).unwrap().is_full());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_full_node_promotes_placeholder_and_keeps_edges() {
        let mut graph = graph_with_chain();
        graph.add_node(Node::full(Res::new("pki/root"))).unwrap();

        assert!(graph.get_node(&key("pki/root")).unwrap().is_full());
        assert_eq!(graph.find_unsatisfied_nodes(&key("pki/root")).len(), 2);
    }

    #[test]
    fn test_add_edge_requires_both_nodes() {
        let mut graph: DependencyGraph<Res> = DependencyGraph::new();
        graph.add_node(Node::placeholder(key("pki/root"))).unwrap();

        let err = graph.add_edge(&key("pki/root"), &key("pki/missing"), EdgeStatus::Unsatisfied).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound { key: key("pki/missing") });
    }

    #[test]
    fn test_add_edge_overwrites_status() {
        let mut graph = graph_with_chain();
        graph.add_edge(&key("pki/root"), &key("pki_int/a"), EdgeStatus::Satisfied).unwrap();

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/a")), Some(EdgeStatus::Satisfied));
    }

    #[test]
    fn test_are_edges_satisfied() {
        let mut graph = graph_with_chain();
        assert!(!graph.are_edges_satisfied(&key("pki/root")));
        assert!(graph.are_edges_satisfied(&key("pki_int/a")), "no outbound edges is vacuously satisfied");

        graph.update_edge_status(&key("pki/root"), &key("pki_int/a"), EdgeStatus::Satisfied).unwrap();
        assert!(!graph.are_edges_satisfied(&key("pki/root")));

        graph.update_edge_status(&key("pki/root"), &key("pki_int/b"), EdgeStatus::InProcess).unwrap();
        assert!(!graph.are_edges_satisfied(&key("pki/root")));

        graph.update_edge_status(&key("pki/root"), &key("pki_int/b"), EdgeStatus::Satisfied).unwrap();
        assert!(graph.are_edges_satisfied(&key("pki/root")));
    }

    #[test]
    fn test_find_unsatisfied_nodes_is_a_snapshot() {
        let mut graph = graph_with_chain();
        let snapshot = graph.find_unsatisfied_nodes(&key("pki/root"));

        graph.update_edge_status(&key("pki/root"), &key("pki_int/a"), EdgeStatus::InProcess).unwrap();

        assert_eq!(snapshot.len(), 2);
        let remaining = graph.find_unsatisfied_nodes(&key("pki/root"));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key(), key("pki_int/b"));
    }

    #[test]
    fn test_find_all_unsatisfied_edges_in_insertion_order() {
        let mut graph = graph_with_chain();
        graph.add_node(Node::full(Res::new("pki_int/c"))).unwrap();
        graph.add_edge(&key("pki_int/a"), &key("pki_int/c"), EdgeStatus::Unsatisfied).unwrap();
        graph.update_edge_status(&key("pki/root"), &key("pki_int/b"), EdgeStatus::Satisfied).unwrap();

        assert_eq!(
            graph.find_all_unsatisfied_edges(),
            vec![(key("pki/root"), key("pki_int/a")), (key("pki_int/a"), key("pki_int/c"))]
        );
    }

    #[test]
    fn test_update_missing_edge_fails() {
        let mut graph = graph_with_chain();
        let err = graph.update_edge_status(&key("pki_int/a"), &key("pki_int/b"), EdgeStatus::Satisfied).unwrap_err();
        assert!(matches!(err, GraphError::EdgeNotFound { .. }));
    }

    #[test]
    fn test_relabel_demotes_and_keeps_state() {
        let mut graph = graph_with_chain();
        graph.set_node_state(&key("pki_int/a"), NodeState::Materialized).unwrap();

        graph.relabel_nodes([(key("pki_int/a"), Node::placeholder(key("pki_int/a")))]).unwrap();

        assert!(graph.get_node(&key("pki_int/a")).unwrap().is_placeholder());
        assert!(graph.is_materialized(&key("pki_int/a")));
        assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/a")), Some(EdgeStatus::Unsatisfied));
    }

    #[test]
    fn test_relabel_to_new_key_rewrites_edges() {
        let mut graph = graph_with_chain();
        graph.relabel_nodes([(key("pki/root"), Node::full(Res::new("pki/renamed")))]).unwrap();

        assert!(graph.get_node(&key("pki/root")).is_none());
        assert_eq!(graph.find_unsatisfied_nodes(&key("pki/renamed")).len(), 2);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_relabel_missing_node_fails() {
        let mut graph = graph_with_chain();
        let err = graph.relabel_nodes([(key("pki/none"), Node::placeholder(key("pki/none")))]).unwrap_err();
        assert_eq!(err, GraphError::NodeNotFound { key: key("pki/none") });
    }

    #[test]
    fn test_has_pending_inbound() {
        let mut graph = graph_with_chain();
        assert!(!graph.has_pending_inbound(&key("pki/root")));
        assert!(graph.has_pending_inbound(&key("pki_int/a")));

        graph.update_edge_status(&key("pki/root"), &key("pki_int/a"), EdgeStatus::Satisfied).unwrap();
        assert!(!graph.has_pending_inbound(&key("pki_int/a")));
    }

    #[test]
    fn test_dependent_with_two_roots() {
        let mut graph = graph_with_chain();
        graph.add_node(Node::placeholder(key("sys/mounts/pki_int"))).unwrap();
        graph
            .add_edge(&key("sys/mounts/pki_int"), &key("pki_int/a"), EdgeStatus::Unsatisfied)
            .unwrap();

        assert_eq!(graph.roots_of(&key("pki_int/a")), vec![key("pki/root"), key("sys/mounts/pki_int")]);
        assert!(graph.are_roots_materialized(&key("pki/root")), "a root with no roots is ready");

        graph.set_node_state(&key("pki/root"), NodeState::Materialized).unwrap();
        assert!(!graph.are_roots_materialized(&key("pki_int/a")));
        graph.set_node_state(&key("sys/mounts/pki_int"), NodeState::Materialized).unwrap();
        assert!(graph.are_roots_materialized(&key("pki_int/a")));

        graph.set_inbound_status(&key("pki_int/a"), EdgeStatus::InProcess);
        assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/a")), Some(EdgeStatus::InProcess));
        assert_eq!(
            graph.edge_status(&key("sys/mounts/pki_int"), &key("pki_int/a")),
            Some(EdgeStatus::InProcess)
        );
        assert_eq!(graph.edge_status(&key("pki/root"), &key("pki_int/b")), Some(EdgeStatus::Unsatisfied));
    }

    #[test]
    fn test_node_states_default_by_variant() {
        let graph = graph_with_chain();
        assert_eq!(graph.node_state(&key("pki/root")), Some(NodeState::Referenced));
        assert_eq!(graph.node_state(&key("pki_int/a")), Some(NodeState::Declared));
        assert_eq!(graph.node_state(&key("pki/none")), None);
    }

    fn edge_pairs(graph: &DependencyGraph<Res>) -> Vec<(NodeKey, NodeKey, EdgeStatus)> {
        let mut pairs: Vec<_> =
            graph.edges().iter().map(|e| (e.root.clone(), e.dependent.clone(), e.status)).collect();
        pairs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        pairs
    }

    proptest! {
        #[test]
        fn prop_relabel_preserves_edges(
            links in proptest::collection::vec((0usize..6, 0usize..6, 0u8..3), 1..20),
            target in 0usize..6,
            demote in any::<bool>(),
        ) {
            let mut graph: DependencyGraph<Res> = DependencyGraph::new();
            for i in 0..6 {
                graph.add_node(Node::full(Res::new(&format!("mount/n{i}")))).unwrap();
            }
            for (root, dependent, status) in links {
                let status = match status {
                    0 => EdgeStatus::Unsatisfied,
                    1 => EdgeStatus::InProcess,
                    _ => EdgeStatus::Satisfied,
                };
                graph
                    .add_edge(&key(&format!("mount/n{root}")), &key(&format!("mount/n{dependent}")), status)
                    .unwrap();
            }

            let before = edge_pairs(&graph);
            let target_key = key(&format!("mount/n{target}"));
            let replacement = if demote {
                Node::placeholder(target_key.clone())
            } else {
                Node::full(Res { path: format!("mount/n{target}"), version: 2 })
            };
            graph.relabel_nodes([(target_key.clone(), replacement)]).unwrap();

            prop_assert_eq!(edge_pairs(&graph), before);
            prop_assert_eq!(graph.node_count(), 6);
            prop_assert_eq!(graph.get_node(&target_key).unwrap().is_placeholder(), demote);
        }

        #[test]
        fn prop_satisfied_iff_all_outbound_satisfied(statuses in proptest::collection::vec(0u8..3, 0..8)) {
            let mut graph: DependencyGraph<Res> = DependencyGraph::new();
            graph.add_node(Node::placeholder(key("pki/root"))).unwrap();
            for (i, status) in statuses.iter().enumerate() {
                let dependent = key(&format!("pki_int/d{i}"));
                graph.add_node(Node::full(Res::new(dependent.as_str()))).unwrap();
                let status = match status {
                    0 => EdgeStatus::Unsatisfied,
                    1 => EdgeStatus::InProcess,
                    _ => EdgeStatus::Satisfied,
                };
                graph.add_edge(&key("pki/root"), &dependent, status).unwrap();
            }

            let expected = statuses.iter().all(|s| *s == 2);
            prop_assert_eq!(graph.are_edges_satisfied(&key("pki/root")), expected);
        }
    }
}
