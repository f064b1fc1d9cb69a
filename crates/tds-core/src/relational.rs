//! # Relational Store
//!
//! The authoritative record for relations, projects, asset references,
//! publications and the mirror outbox.
//!
//! `RelationalStore` is the handle the coordinator and aggregator consume.
//! Each method is one scoped session: it commits or fails as a unit and
//! holds nothing across calls. Ids are assigned by the store, start at 1
//! and are never reused.

use crate::{
    AssetId, AssetInsert, MirrorOp, Project, ProjectAsset, ProjectId, ProvenancePayload,
    Publication, PublicationDraft, PublicationId, Relation, RelationId, ResourceType, TdsError,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// RELATIONAL STORE TRAIT
// =============================================================================

pub trait RelationalStore: Send + Sync {
    // --- relations -----------------------------------------------------------

    /// Insert one relation row and return it with its assigned id.
    fn insert_relation(&self, payload: &ProvenancePayload) -> Result<Relation, TdsError>;

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError>;

    /// Delete a relation row, returning it if it existed.
    fn delete_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError>;

    /// Number of rows whose payload equals `payload`.
    fn count_matching_relations(&self, payload: &ProvenancePayload) -> Result<usize, TdsError>;

    fn relation_count(&self) -> Result<usize, TdsError>;

    // --- projects ------------------------------------------------------------

    fn insert_project(&self, name: &str, description: &str) -> Result<Project, TdsError>;

    /// Insert a project and its initial asset references in one transaction.
    /// Either every row is written or none is. Repeated references are
    /// stored once.
    fn insert_project_with_assets(
        &self,
        name: &str,
        description: &str,
        assets: &[(ResourceType, String)],
    ) -> Result<Project, TdsError>;

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, TdsError>;

    /// Projects in id order.
    fn list_projects(&self, offset: usize, limit: usize) -> Result<Vec<Project>, TdsError>;

    /// Replace a project row. Returns `false` if no row has that id.
    fn update_project(&self, project: &Project) -> Result<bool, TdsError>;

    fn set_project_active(&self, id: ProjectId, active: bool) -> Result<bool, TdsError>;

    fn project_count(&self) -> Result<usize, TdsError>;

    // --- project assets ------------------------------------------------------

    /// Insert an asset reference unless the same triple already exists.
    fn insert_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<AssetInsert, TdsError>;

    fn delete_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool, TdsError>;

    /// Asset rows of a project in insertion order, restricted to `types`
    /// (all types when empty).
    fn list_assets(
        &self,
        project_id: ProjectId,
        types: &[ResourceType],
    ) -> Result<Vec<ProjectAsset>, TdsError>;

    // --- publications --------------------------------------------------------

    fn insert_publication(&self, draft: &PublicationDraft) -> Result<Publication, TdsError>;

    fn get_publication(&self, id: PublicationId) -> Result<Option<Publication>, TdsError>;

    /// `IN`-filtered lookup. Rows come back in id order; unknown ids are skipped.
    fn publications_in(&self, ids: &[PublicationId]) -> Result<Vec<Publication>, TdsError>;

    // --- mirror outbox -------------------------------------------------------

    /// Append a failed mirror write. Returns its sequence number.
    fn enqueue_mirror(&self, op: MirrorOp) -> Result<u64, TdsError>;

    /// Oldest pending entries first.
    fn pending_mirror(&self, limit: usize) -> Result<Vec<(u64, MirrorOp)>, TdsError>;

    /// Remove a replayed entry.
    fn ack_mirror(&self, seq: u64) -> Result<bool, TdsError>;

    fn outbox_len(&self) -> Result<usize, TdsError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    relations: BTreeMap<RelationId, Relation>,
    projects: BTreeMap<ProjectId, Project>,
    assets: BTreeMap<AssetId, ProjectAsset>,
    publications: BTreeMap<PublicationId, Publication>,
    outbox: BTreeMap<u64, MirrorOp>,
    last_relation: u64,
    last_project: u64,
    last_asset: u64,
    last_publication: u64,
    last_outbox: u64,
}

fn next(counter: &mut u64) -> u64 {
    *counter = counter.saturating_add(1);
    *counter
}

impl Tables {
    fn add_project(&mut self, name: &str, description: &str) -> Project {
        let id = ProjectId(next(&mut self.last_project));
        let row = Project {
            id,
            name: name.to_string(),
            description: description.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        self.projects.insert(id, row.clone());
        row
    }

    fn add_asset(
        &mut self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> AssetInsert {
        let exists = self.assets.values().any(|a| {
            a.project_id == project_id
                && a.resource_type == resource_type
                && a.resource_id == resource_id
        });
        if exists {
            return AssetInsert::Duplicate;
        }

        let id = AssetId(next(&mut self.last_asset));
        let row = ProjectAsset {
            id,
            project_id,
            resource_type,
            resource_id: resource_id.to_string(),
        };
        self.assets.insert(id, row.clone());
        AssetInsert::Inserted(row)
    }
}

/// A volatile relational store backed by `BTreeMap` tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, TdsError> {
        self.tables
            .lock()
            .map_err(|_| TdsError::relational("table lock poisoned"))
    }
}

impl RelationalStore for MemoryStore {
    fn insert_relation(&self, payload: &ProvenancePayload) -> Result<Relation, TdsError> {
        let mut t = self.tables()?;
        let id = RelationId(next(&mut t.last_relation));
        let row = Relation::from_payload(id, payload, Utc::now());
        t.relations.insert(id, row.clone());
        Ok(row)
    }

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        Ok(self.tables()?.relations.get(&id).cloned())
    }

    fn delete_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        Ok(self.tables()?.relations.remove(&id))
    }

    fn count_matching_relations(&self, payload: &ProvenancePayload) -> Result<usize, TdsError> {
        Ok(self
            .tables()?
            .relations
            .values()
            .filter(|r| r.payload() == *payload)
            .count())
    }

    fn relation_count(&self) -> Result<usize, TdsError> {
        Ok(self.tables()?.relations.len())
    }

    fn insert_project(&self, name: &str, description: &str) -> Result<Project, TdsError> {
        Ok(self.tables()?.add_project(name, description))
    }

    fn insert_project_with_assets(
        &self,
        name: &str,
        description: &str,
        assets: &[(ResourceType, String)],
    ) -> Result<Project, TdsError> {
        let mut t = self.tables()?;
        let row = t.add_project(name, description);
        for (resource_type, resource_id) in assets {
            t.add_asset(row.id, *resource_type, resource_id);
        }
        Ok(row)
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, TdsError> {
        Ok(self.tables()?.projects.get(&id).cloned())
    }

    fn list_projects(&self, offset: usize, limit: usize) -> Result<Vec<Project>, TdsError> {
        Ok(self
            .tables()?
            .projects
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn update_project(&self, project: &Project) -> Result<bool, TdsError> {
        let mut t = self.tables()?;
        match t.projects.get_mut(&project.id) {
            Some(row) => {
                *row = project.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_project_active(&self, id: ProjectId, active: bool) -> Result<bool, TdsError> {
        let mut t = self.tables()?;
        match t.projects.get_mut(&id) {
            Some(row) => {
                row.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn project_count(&self) -> Result<usize, TdsError> {
        Ok(self.tables()?.projects.len())
    }

    fn insert_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<AssetInsert, TdsError> {
        Ok(self
            .tables()?
            .add_asset(project_id, resource_type, resource_id))
    }

    fn delete_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool, TdsError> {
        let mut t = self.tables()?;
        let found = t
            .assets
            .values()
            .find(|a| {
                a.project_id == project_id
                    && a.resource_type == resource_type
                    && a.resource_id == resource_id
            })
            .map(|a| a.id);
        Ok(match found {
            Some(id) => t.assets.remove(&id).is_some(),
            None => false,
        })
    }

    fn list_assets(
        &self,
        project_id: ProjectId,
        types: &[ResourceType],
    ) -> Result<Vec<ProjectAsset>, TdsError> {
        Ok(self
            .tables()?
            .assets
            .values()
            .filter(|a| a.project_id == project_id)
            .filter(|a| types.is_empty() || types.contains(&a.resource_type))
            .cloned()
            .collect())
    }

    fn insert_publication(&self, draft: &PublicationDraft) -> Result<Publication, TdsError> {
        let mut t = self.tables()?;
        let id = PublicationId(next(&mut t.last_publication));
        let row = Publication {
            id,
            xdd_uri: draft.xdd_uri.clone(),
            title: draft.title.clone(),
        };
        t.publications.insert(id, row.clone());
        Ok(row)
    }

    fn get_publication(&self, id: PublicationId) -> Result<Option<Publication>, TdsError> {
        Ok(self.tables()?.publications.get(&id).cloned())
    }

    fn publications_in(&self, ids: &[PublicationId]) -> Result<Vec<Publication>, TdsError> {
        let t = self.tables()?;
        let wanted: BTreeSet<PublicationId> = ids.iter().copied().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| t.publications.get(&id).cloned())
            .collect())
    }

    fn enqueue_mirror(&self, op: MirrorOp) -> Result<u64, TdsError> {
        let mut t = self.tables()?;
        let seq = next(&mut t.last_outbox);
        t.outbox.insert(seq, op);
        Ok(seq)
    }

    fn pending_mirror(&self, limit: usize) -> Result<Vec<(u64, MirrorOp)>, TdsError> {
        Ok(self
            .tables()?
            .outbox
            .iter()
            .take(limit)
            .map(|(seq, op)| (*seq, *op))
            .collect())
    }

    fn ack_mirror(&self, seq: u64) -> Result<bool, TdsError> {
        Ok(self.tables()?.outbox.remove(&seq).is_some())
    }

    fn outbox_len(&self) -> Result<usize, TdsError> {
        Ok(self.tables()?.outbox.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
