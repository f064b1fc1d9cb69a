//! # Provenance Coordinator
//!
//! Creates, reads and deletes typed relations between resources, keeping the
//! relational record and the graph mirror consistent.
//!
//! ## Write Policy
//!
//! The relational write always commits first and is the only write whose
//! failure reaches the caller. The graph mirror is attempted afterwards and
//! is best-effort: a failure is logged and, when the outbox is enabled,
//! queued in the relational store for [`ProvenanceCoordinator::replay_outbox`].
//!
//! ## Mirror Protocol
//!
//! 1. merge the left node `(left_type, left)`
//! 2. merge the right node `(right_type, right)`
//! 3. merge the edge `left -[relation_type {user_id}]-> right`
//!
//! Every step is create-if-absent, so replaying the protocol after a partial
//! failure converges on the same graph. An endpoint pruned between steps 2
//! and 3 makes step 3 a no-op; the protocol is rerun once and then reported
//! as a graph failure so the write is queued.

use crate::graph::GraphMirror;
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::relational::RelationalStore;
use crate::{
    MirrorOp, NodeKey, ProvenancePayload, Relation, RelationDraft, RelationId, RelationType,
    ResourceType, TdsError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outbox entries fetched per replay batch.
const REPLAY_BATCH: usize = 256;

/// Full passes of the merge protocol before a mirror write is reported failed.
const MIRROR_ATTEMPTS: usize = 2;

/// Result of an outbox replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Entries applied to the graph and acknowledged.
    pub replayed: usize,
    /// Entries acknowledged without a graph write because the relational
    /// record no longer calls for them.
    pub skipped: usize,
    /// Entries still pending.
    pub remaining: usize,
}

/// Dual-write coordinator over a relational store and an optional graph mirror.
pub struct ProvenanceCoordinator {
    relational: Arc<dyn RelationalStore>,
    graph: Option<Arc<dyn GraphMirror>>,
    outbox: bool,
}

impl std::fmt::Debug for ProvenanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceCoordinator")
            .field("mirror_enabled", &self.graph.is_some())
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

impl ProvenanceCoordinator {
    /// Coordinator with the outbox enabled.
    pub fn new(relational: Arc<dyn RelationalStore>, graph: Option<Arc<dyn GraphMirror>>) -> Self {
        Self {
            relational,
            graph,
            outbox: true,
        }
    }

    #[must_use]
    pub fn with_outbox(mut self, enabled: bool) -> Self {
        self.outbox = enabled;
        self
    }

    pub fn mirror_enabled(&self) -> bool {
        self.graph.is_some()
    }

    fn graph(&self) -> Result<&Arc<dyn GraphMirror>, TdsError> {
        self.graph.as_ref().ok_or(TdsError::GraphDisabled)
    }

    // =========================================================================
    // RELATIONAL OPERATIONS
    // =========================================================================

    /// Validate and store a relation, then mirror it.
    ///
    /// Returns the new relation id once the relational row is committed,
    /// whatever happens to the mirror write.
    pub fn create(&self, draft: &RelationDraft) -> Result<RelationId, TdsError> {
        let payload = draft.validate()?;
        let row = self.relational.insert_relation(&payload)?;
        debug!(
            relation = %row.id,
            left = payload.left,
            right = payload.right,
            relation_type = %payload.relation_type,
            "relation stored"
        );

        self.mirror_after_commit(row.id, MirrorOp::Create(payload));
        Ok(row.id)
    }

    /// Look up a relation row. Never touches the graph.
    pub fn retrieve(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        self.relational.get_relation(id)
    }

    /// Delete a relation row and, if no other row shares its key, the
    /// mirrored edge. Returns `false` when no row has that id.
    pub fn delete(&self, id: RelationId) -> Result<bool, TdsError> {
        let Some(row) = self.relational.get_relation(id)? else {
            return Ok(false);
        };
        let payload = row.payload();
        let shared = self.relational.count_matching_relations(&payload)? > 1;

        if self.relational.delete_relation(id)?.is_none() {
            return Ok(false);
        }
        debug!(relation = %id, "relation deleted");

        if shared {
            debug!(relation = %id, "edge still backed by another relation; mirror kept");
        } else {
            self.mirror_after_commit(id, MirrorOp::Delete(payload));
        }
        Ok(true)
    }

    // =========================================================================
    // GRAPH MIRROR
    // =========================================================================

    /// Run the three-step merge protocol for one payload.
    ///
    /// Succeeds only once the edge is present in the graph.
    pub fn mirror(&self, payload: &ProvenancePayload) -> Result<(), TdsError> {
        let graph = self.graph()?;
        let edge = payload.edge();

        for attempt in 1..=MIRROR_ATTEMPTS {
            graph.merge_node(payload.left_node())?;
            graph.merge_node(payload.right_node())?;
            if graph.merge_edge(&edge)? || graph.contains_edge(&edge)? {
                return Ok(());
            }
            debug!(attempt, "edge endpoint vanished before merge");
        }

        Err(TdsError::graph(format!(
            "edge {} -[{}]-> {} not written: endpoint node missing",
            payload.left, payload.relation_type, payload.right
        )))
    }

    /// Remove the mirrored edge for one payload. Nodes are kept.
    pub fn unmirror(&self, payload: &ProvenancePayload) -> Result<bool, TdsError> {
        self.graph()?.delete_edge(&payload.edge())
    }

    fn apply(&self, op: &MirrorOp) -> Result<(), TdsError> {
        match op {
            MirrorOp::Create(payload) => self.mirror(payload),
            MirrorOp::Delete(payload) => self.unmirror(payload).map(|_| ()),
        }
    }

    fn mirror_after_commit(&self, id: RelationId, op: MirrorOp) {
        if self.graph.is_none() {
            return;
        }

        let Err(e) = self.apply(&op) else {
            return;
        };
        warn!(relation = %id, op = ?op, error = %e, "graph mirror write failed");

        if !self.outbox {
            return;
        }
        match self.relational.enqueue_mirror(op) {
            Ok(seq) => info!(relation = %id, seq, "mirror write queued for replay"),
            Err(qe) => warn!(relation = %id, error = %qe, "mirror write could not be queued"),
        }
    }

    /// Replay queued mirror writes oldest-first.
    ///
    /// Each entry is checked against the relational record before it is
    /// applied: a create whose rows are gone, or a delete whose key is
    /// backed again, is acknowledged without touching the graph. Replay
    /// stops at the first graph failure so later entries never overtake it.
    pub fn replay_outbox(&self) -> Result<ReplayReport, TdsError> {
        self.graph()?;
        let mut report = ReplayReport::default();

        'batches: loop {
            let batch = self.relational.pending_mirror(REPLAY_BATCH)?;
            if batch.is_empty() {
                break;
            }

            for (seq, op) in batch {
                let backed = self.relational.count_matching_relations(op.payload())? > 0;
                let wanted = match op {
                    MirrorOp::Create(_) => backed,
                    MirrorOp::Delete(_) => !backed,
                };

                if wanted {
                    if let Err(e) = self.apply(&op) {
                        warn!(seq, error = %e, "outbox replay stopped");
                        break 'batches;
                    }
                    report.replayed += 1;
                } else {
                    report.skipped += 1;
                }
                self.relational.ack_mirror(seq)?;
            }
        }

        report.remaining = self.relational.outbox_len()?;
        info!(
            replayed = report.replayed,
            skipped = report.skipped,
            remaining = report.remaining,
            "outbox replay finished"
        );
        Ok(report)
    }

    pub fn pending_mirror_ops(&self) -> Result<usize, TdsError> {
        self.relational.outbox_len()
    }

    // =========================================================================
    // GRAPH QUERIES
    // =========================================================================

    /// Every node reachable from `(artifact_type, artifact_id)` along one or
    /// more `derivedfrom` edges.
    pub fn search_derived_from(
        &self,
        artifact_id: u64,
        artifact_type: ResourceType,
    ) -> Result<Vec<NodeKey>, TdsError> {
        self.graph()?.reachable(
            NodeKey::new(artifact_type, artifact_id),
            RelationType::DerivedFrom,
            MAX_TRAVERSAL_DEPTH,
        )
    }

    /// Delete graph nodes left without edges by earlier deletes.
    pub fn prune_orphan_nodes(&self) -> Result<usize, TdsError> {
        let removed = self.graph()?.prune_orphans()?;
        info!(removed, "orphan graph nodes pruned");
        Ok(removed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
