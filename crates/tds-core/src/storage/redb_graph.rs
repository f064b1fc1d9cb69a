//! # redb-backed Graph Mirror
//!
//! A disk-backed graph mirror using the redb embedded database.
//!
//! Nodes and edges are stored as bare keys with `()` values, so merge is
//! "insert if the key is absent" and delete is a key removal. Edge keys put
//! `(from node, relation)` first, so the neighbors of a node along one
//! relation are a single contiguous range scan.

use crate::graph::GraphMirror;
use crate::{EdgeKey, NodeKey, RelationType, ResourceType, TdsError, UserId};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeSet;
use std::path::Path;

/// Nodes: (label code, resource id) -> ()
const NODES: TableDefinition<(u8, u64), ()> = TableDefinition::new("nodes");

/// Edges: (from label, from id, relation code, to label, to id, user id) -> ()
const EDGES: TableDefinition<(u8, u64, u8, u8, u64, u64), ()> = TableDefinition::new("edges");

type RawEdge = (u8, u64, u8, u8, u64, u64);

fn node_key(node: NodeKey) -> (u8, u64) {
    (node.label.code(), node.id)
}

fn edge_key(edge: &EdgeKey) -> RawEdge {
    (
        edge.from.label.code(),
        edge.from.id,
        edge.relation.code(),
        edge.to.label.code(),
        edge.to.id,
        edge.user_id.0,
    )
}

fn decode_node(label: u8, id: u64) -> Result<NodeKey, TdsError> {
    let label = ResourceType::from_code(label)
        .ok_or_else(|| TdsError::SerializationError(format!("unknown label code {label}")))?;
    Ok(NodeKey::new(label, id))
}

fn decode_edge(raw: RawEdge) -> Result<EdgeKey, TdsError> {
    let (from_label, from_id, relation, to_label, to_id, user) = raw;
    let relation = RelationType::from_code(relation)
        .ok_or_else(|| TdsError::SerializationError(format!("unknown relation code {relation}")))?;
    Ok(EdgeKey {
        from: decode_node(from_label, from_id)?,
        relation,
        to: decode_node(to_label, to_id)?,
        user_id: UserId(user),
    })
}

/// A disk-backed graph mirror using redb.
pub struct RedbGraph {
    db: Database,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph").finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TdsError> {
        let db = Database::create(path.as_ref()).map_err(TdsError::graph)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(TdsError::graph)?;
            let _ = write_txn.open_table(NODES).map_err(TdsError::graph)?;
            let _ = write_txn.open_table(EDGES).map_err(TdsError::graph)?;
            write_txn.commit().map_err(TdsError::graph)?;
        }

        Ok(Self { db })
    }

    /// Get all nodes in deterministic order.
    pub fn nodes(&self) -> Result<Vec<NodeKey>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let nodes = read_txn.open_table(NODES).map_err(TdsError::graph)?;

        let mut out = Vec::new();
        for entry in nodes.iter().map_err(TdsError::graph)? {
            let (key, _) = entry.map_err(TdsError::graph)?;
            let (label, id) = key.value();
            out.push(decode_node(label, id)?);
        }
        Ok(out)
    }

    /// Get all edges in deterministic order.
    pub fn edges(&self) -> Result<Vec<EdgeKey>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let edges = read_txn.open_table(EDGES).map_err(TdsError::graph)?;

        let mut out = Vec::new();
        for entry in edges.iter().map_err(TdsError::graph)? {
            let (key, _) = entry.map_err(TdsError::graph)?;
            out.push(decode_edge(key.value())?);
        }
        Ok(out)
    }
}

// =============================================================================
// GRAPHMIRROR TRAIT IMPLEMENTATION
// =============================================================================

impl GraphMirror for RedbGraph {
    fn merge_node(&self, node: NodeKey) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::graph)?;
        let created = {
            let mut nodes = write_txn.open_table(NODES).map_err(TdsError::graph)?;
            let key = node_key(node);
            if nodes.get(key).map_err(TdsError::graph)?.is_some() {
                false
            } else {
                nodes.insert(key, ()).map_err(TdsError::graph)?;
                true
            }
        };
        write_txn.commit().map_err(TdsError::graph)?;
        Ok(created)
    }

    fn merge_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::graph)?;
        let created = {
            let nodes = write_txn.open_table(NODES).map_err(TdsError::graph)?;
            let endpoints_exist = nodes
                .get(node_key(edge.from))
                .map_err(TdsError::graph)?
                .is_some()
                && nodes
                    .get(node_key(edge.to))
                    .map_err(TdsError::graph)?
                    .is_some();

            let mut edges = write_txn.open_table(EDGES).map_err(TdsError::graph)?;
            let key = edge_key(edge);
            if !endpoints_exist || edges.get(key).map_err(TdsError::graph)?.is_some() {
                false
            } else {
                edges.insert(key, ()).map_err(TdsError::graph)?;
                true
            }
        };
        write_txn.commit().map_err(TdsError::graph)?;
        Ok(created)
    }

    fn delete_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::graph)?;
        let removed = {
            let mut edges = write_txn.open_table(EDGES).map_err(TdsError::graph)?;
            edges
                .remove(edge_key(edge))
                .map_err(TdsError::graph)?
                .is_some()
        };
        write_txn.commit().map_err(TdsError::graph)?;
        Ok(removed)
    }

    fn contains_node(&self, node: NodeKey) -> Result<bool, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let nodes = read_txn.open_table(NODES).map_err(TdsError::graph)?;
        Ok(nodes.get(node_key(node)).map_err(TdsError::graph)?.is_some())
    }

    fn contains_edge(&self, edge: &EdgeKey) -> Result<bool, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let edges = read_txn.open_table(EDGES).map_err(TdsError::graph)?;
        Ok(edges.get(edge_key(edge)).map_err(TdsError::graph)?.is_some())
    }

    fn neighbors(&self, node: NodeKey, relation: RelationType) -> Result<Vec<NodeKey>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let edges = read_txn.open_table(EDGES).map_err(TdsError::graph)?;

        let (label, id) = node_key(node);
        let rel = relation.code();
        let mut targets = BTreeSet::new();
        for entry in edges
            .range((label, id, rel, 0, 0, 0)..=(label, id, rel, u8::MAX, u64::MAX, u64::MAX))
            .map_err(TdsError::graph)?
        {
            let (key, _) = entry.map_err(TdsError::graph)?;
            let (_, _, _, to_label, to_id, _) = key.value();
            targets.insert(decode_node(to_label, to_id)?);
        }
        Ok(targets.into_iter().collect())
    }

    fn prune_orphans(&self) -> Result<usize, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::graph)?;
        let removed = {
            let edges = write_txn.open_table(EDGES).map_err(TdsError::graph)?;
            let mut connected = BTreeSet::new();
            for entry in edges.iter().map_err(TdsError::graph)? {
                let (key, _) = entry.map_err(TdsError::graph)?;
                let (fl, fid, _, tl, tid, _) = key.value();
                connected.insert((fl, fid));
                connected.insert((tl, tid));
            }

            let mut nodes = write_txn.open_table(NODES).map_err(TdsError::graph)?;
            let mut orphans = Vec::new();
            for entry in nodes.iter().map_err(TdsError::graph)? {
                let (key, _) = entry.map_err(TdsError::graph)?;
                let key = key.value();
                if !connected.contains(&key) {
                    orphans.push(key);
                }
            }
            for key in &orphans {
                nodes.remove(*key).map_err(TdsError::graph)?;
            }
            orphans.len()
        };
        write_txn.commit().map_err(TdsError::graph)?;
        Ok(removed)
    }

    fn node_count(&self) -> Result<usize, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let nodes = read_txn.open_table(NODES).map_err(TdsError::graph)?;
        Ok(nodes.len().map_err(TdsError::graph)? as usize)
    }

    fn edge_count(&self) -> Result<usize, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::graph)?;
        let edges = read_txn.open_table(EDGES).map_err(TdsError::graph)?;
        Ok(edges.len().map_err(TdsError::graph)? as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::MAX_TRAVERSAL_DEPTH;
    use tempfile::tempdir;

    fn dataset(id: u64) -> NodeKey {
        NodeKey::new(ResourceType::Datasets, id)
    }

    fn model(id: u64) -> NodeKey {
        NodeKey::new(ResourceType::Models, id)
    }

    fn derives(from: NodeKey, to: NodeKey, user: u64) -> EdgeKey {
        EdgeKey {
            from,
            relation: RelationType::Derives,
            to,
            user_id: UserId(user),
        }
    }

    #[test]
    fn basic_merge() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("graph.redb")).expect("open db");

        assert!(graph.merge_node(dataset(10)).expect("merge"));
        assert!(graph.merge_node(model(20)).expect("merge"));
        assert!(!graph.merge_node(dataset(10)).expect("merge"));

        let edge = derives(dataset(10), model(20), 1);
        assert!(graph.merge_edge(&edge).expect("merge edge"));
        assert!(!graph.merge_edge(&edge).expect("merge edge"));

        assert_eq!(graph.node_count().expect("count"), 2);
        assert_eq!(graph.edge_count().expect("count"), 1);
        assert_eq!(graph.edges().expect("edges"), vec![edge]);
    }

    #[test]
    fn edge_requires_both_endpoints() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("graph.redb")).expect("open db");
        graph.merge_node(dataset(1)).expect("merge");

        assert!(!graph.merge_edge(&derives(dataset(1), model(2), 0)).expect("merge"));
        assert_eq!(graph.edge_count().expect("count"), 0);
    }

    #[test]
    fn persistence() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("graph.redb");
        let edge = derives(dataset(1), model(2), 7);

        // Create and populate
        {
            let graph = RedbGraph::open(&db_path).expect("open db");
            graph.merge_node(dataset(1)).expect("merge");
            graph.merge_node(model(2)).expect("merge");
            graph.merge_edge(&edge).expect("merge");
        }

        // Reopen and verify
        {
            let graph = RedbGraph::open(&db_path).expect("open db");
            assert_eq!(graph.nodes().expect("nodes"), vec![dataset(1), model(2)]);
            assert!(graph.contains_edge(&edge).expect("contains"));
        }
    }

    #[test]
    fn delete_edge_leaves_nodes() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("graph.redb")).expect("open db");
        let edge = derives(dataset(1), model(2), 0);
        graph.merge_node(dataset(1)).expect("merge");
        graph.merge_node(model(2)).expect("merge");
        graph.merge_edge(&edge).expect("merge");

        assert!(graph.delete_edge(&edge).expect("delete"));
        assert!(!graph.delete_edge(&edge).expect("delete"));
        assert!(graph.contains_node(dataset(1)).expect("contains"));
        assert_eq!(graph.prune_orphans().expect("prune"), 2);
        assert_eq!(graph.node_count().expect("count"), 0);
    }

    #[test]
    fn neighbors_scan_one_relation() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("graph.redb")).expect("open db");
        for n in [dataset(1), model(2), model(3), model(4)] {
            graph.merge_node(n).expect("merge");
        }
        graph.merge_edge(&derives(dataset(1), model(3), 1)).expect("edge");
        graph.merge_edge(&derives(dataset(1), model(2), 1)).expect("edge");
        graph.merge_edge(&derives(dataset(1), model(2), 2)).expect("edge");
        graph
            .merge_edge(&EdgeKey {
                from: dataset(1),
                relation: RelationType::Copies,
                to: model(4),
                user_id: UserId(1),
            })
            .expect("edge");

        assert_eq!(
            graph.neighbors(dataset(1), RelationType::Derives).expect("neighbors"),
            vec![model(2), model(3)]
        );
    }

    #[test]
    fn reachable_bfs() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("graph.redb")).expect("open db");
        let chain = [model(1), dataset(2), dataset(3)];
        for n in chain {
            graph.merge_node(n).expect("merge");
        }
        for pair in chain.windows(2) {
            graph
                .merge_edge(&EdgeKey {
                    from: pair[0],
                    relation: RelationType::DerivedFrom,
                    to: pair[1],
                    user_id: UserId(0),
                })
                .expect("edge");
        }

        let found = graph
            .reachable(model(1), RelationType::DerivedFrom, MAX_TRAVERSAL_DEPTH)
            .expect("reachable");
        assert_eq!(found, vec![dataset(2), dataset(3)]);
    }
}
