//! # Graph Mirror
//!
//! The graph store handle consumed by the provenance coordinator, plus the
//! in-memory implementation.
//!
//! The graph is a derived cache of the relational record. Every write here
//! has merge (create-if-absent) or plain-delete semantics, so replaying the
//! same operation any number of times converges on the same state.

use crate::primitives::{MAX_TRAVERSAL_DEPTH, MAX_TRAVERSAL_RESULTS};
use crate::{EdgeKey, NodeKey, RelationType, ResourceType, TdsError, UserId};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// GRAPH MIRROR TRAIT
// =============================================================================

/// Operations the core needs from a graph store.
///
/// Every method is one session against the store. All queries must be
/// computationally bounded.
pub trait GraphMirror: Send + Sync {
    /// Match-or-create a node. Returns `true` if the node was created.
    fn merge_node(&self, node: NodeKey) -> Result<bool, TdsError>;

    /// Match-or-create an edge between two existing nodes.
    ///
    /// Returns `true` if the edge was created. If either endpoint node is
    /// missing nothing is written and `false` is returned.
    fn merge_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError>;

    /// Delete an edge. Nodes are left in place. Returns whether it existed.
    fn delete_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError>;

    fn contains_node(&self, node: NodeKey) -> Result<bool, TdsError>;

    fn contains_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError>;

    /// Distinct targets of outgoing `relation` edges from `node`.
    fn neighbors(&self, node: NodeKey, relation: RelationType) -> Result<Vec<NodeKey>, TdsError>;

    /// Delete every node with no incident edge. Returns the number removed.
    fn prune_orphans(&self) -> Result<usize, TdsError>;

    fn node_count(&self) -> Result<usize, TdsError>;

    fn edge_count(&self) -> Result<usize, TdsError>;

    /// Every node reachable from `start` along one or more `relation` edges.
    ///
    /// Breadth-first, distinct, in discovery order. The start node itself is
    /// never reported. An unknown start node yields an empty list.
    fn reachable(
        &self,
        start: NodeKey,
        relation: RelationType,
        max_depth: usize,
    ) -> Result<Vec<NodeKey>, TdsError> {
        let depth = max_depth.min(MAX_TRAVERSAL_DEPTH);
        if depth == 0 || !self.contains_node(start)? {
            return Ok(Vec::new());
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        let mut found = Vec::new();

        visited.insert(start);
        queue.push_back((start, 0usize));

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }

            for neighbor in self.neighbors(current, relation)? {
                if visited.insert(neighbor) {
                    found.push(neighbor);
                    if found.len() >= MAX_TRAVERSAL_RESULTS {
                        return Ok(found);
                    }
                    queue.push_back((neighbor, current_depth.saturating_add(1)));
                }
            }
        }

        Ok(found)
    }
}

// =============================================================================
// IN-MEMORY GRAPH
// =============================================================================

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeSet<NodeKey>,
    /// Ordered by (from, relation, to, user) so neighbor scans are range scans.
    edges: BTreeSet<EdgeKey>,
}

/// A volatile graph mirror.
///
/// Uses `BTreeSet` exclusively for deterministic ordering.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
}

impl MemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, GraphState>, TdsError> {
        self.state
            .lock()
            .map_err(|_| TdsError::graph("graph state lock poisoned"))
    }

    /// All nodes in deterministic order.
    pub fn nodes(&self) -> Result<Vec<NodeKey>, TdsError> {
        Ok(self.state()?.nodes.iter().copied().collect())
    }

    /// All edges in deterministic order.
    pub fn edges(&self) -> Result<Vec<EdgeKey>, TdsError> {
        Ok(self.state()?.edges.iter().copied().collect())
    }
}

/// Smallest edge key leaving `from` along `relation`; lower bound for range scans.
pub(crate) fn edge_scan_start(from: NodeKey, relation: RelationType) -> EdgeKey {
    EdgeKey {
        from,
        relation,
        to: NodeKey::new(ResourceType::ALL[0], 0),
        user_id: UserId(0),
    }
}

impl GraphMirror for MemoryGraph {
    fn merge_node(&self, node: NodeKey) -> Result<bool, TdsError> {
        Ok(self.state()?.nodes.insert(node))
    }

    fn merge_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        let mut state = self.state()?;
        if !state.nodes.contains(&edge.from) || !state.nodes.contains(&edge.to) {
            return Ok(false);
        }
        Ok(state.edges.insert(*edge))
    }

    fn delete_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        Ok(self.state()?.edges.remove(edge))
    }

    fn contains_node(&self, node: NodeKey) -> Result<bool, TdsError> {
        Ok(self.state()?.nodes.contains(&node))
    }

    fn contains_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        Ok(self.state()?.edges.contains(edge))
    }

    fn neighbors(&self, node: NodeKey, relation: RelationType) -> Result<Vec<NodeKey>, TdsError> {
        let state = self.state()?;
        let targets: BTreeSet<NodeKey> = state
            .edges
            .range(edge_scan_start(node, relation)..)
            .take_while(|e| e.from == node && e.relation == relation)
            .map(|e| e.to)
            .collect();
        Ok(targets.into_iter().collect())
    }

    fn prune_orphans(&self) -> Result<usize, TdsError> {
        let mut state = self.state()?;
        let connected: BTreeSet<NodeKey> = state
            .edges
            .iter()
            .flat_map(|e| [e.from, e.to])
            .collect();
        let before = state.nodes.len();
        state.nodes.retain(|n| connected.contains(n));
        Ok(before - state.nodes.len())
    }

    fn node_count(&self) -> Result<usize, TdsError> {
        Ok(self.state()?.nodes.len())
    }

    fn edge_count(&self) -> Result<usize, TdsError> {
        Ok(self.state()?.edges.len())
    }
}

// =============================================================================
// UNAVAILABLE GRAPH
// =============================================================================

/// Stand-in for a graph store that could not be opened.
///
/// Every call fails with the open error, so mirror writes land in the outbox
/// and graph queries report the store as unavailable.
#[derive(Debug, Clone)]
pub struct UnavailableGraph {
    reason: String,
}

impl UnavailableGraph {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }

    fn fail<T>(&self) -> Result<T, TdsError> {
        Err(TdsError::graph(&self.reason))
    }
}

impl GraphMirror for UnavailableGraph {
    fn merge_node(&self, _node: NodeKey) -> Result<bool, TdsError> {
        self.fail()
    }

    fn merge_edge(&self, _edge: &EdgeKey) -> Result<bool, TdsError> {
        self.fail()
    }

    fn delete_edge(&self, _edge: &EdgeKey) -> Result<bool, TdsError> {
        self.fail()
    }

    fn contains_node(&self, _node: NodeKey) -> Result<bool, TdsError> {
        self.fail()
    }

    fn contains_edge(&self, _edge: &EdgeKey) -> Result<bool, TdsError> {
        self.fail()
    }

    fn neighbors(&self, _node: NodeKey, _relation: RelationType) -> Result<Vec<NodeKey>, TdsError> {
        self.fail()
    }

    fn prune_orphans(&self) -> Result<usize, TdsError> {
        self.fail()
    }

    fn node_count(&self) -> Result<usize, TdsError> {
        self.fail()
    }

    fn edge_count(&self) -> Result<usize, TdsError> {
        self.fail()
    }
}

// =============================================================================
// TESTS
// =============================================================================
