//! # redb-backed Relational Store
//!
//! The persistent, authoritative record. Every trait method runs in exactly
//! one redb transaction, so a call either commits entirely or not at all.
//!
//! Surrogate ids come from per-table counters in `METADATA` and are never
//! reused, even after deletes.

use super::{decode, encode};
use crate::relational::RelationalStore;
use crate::{
    AssetId, AssetInsert, MirrorOp, Project, ProjectAsset, ProjectId, ProvenancePayload,
    Publication, PublicationDraft, PublicationId, Relation, RelationId, ResourceType, TdsError,
};
use chrono::Utc;
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table, TableDefinition,
    WriteTransaction,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Relation rows: RelationId -> postcard Relation
const RELATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("relations");

/// Row count per payload key: postcard ProvenancePayload -> count
const RELATION_PAYLOADS: TableDefinition<&[u8], u64> = TableDefinition::new("relation_payloads");

/// Project rows: ProjectId -> postcard Project
const PROJECTS: TableDefinition<u64, &[u8]> = TableDefinition::new("projects");

/// Asset rows: AssetId -> postcard ProjectAsset
const ASSETS: TableDefinition<u64, &[u8]> = TableDefinition::new("assets");

/// Uniqueness lookup: (project, type code, resource id) -> AssetId
const ASSET_KEYS: TableDefinition<(u64, u8, &str), u64> = TableDefinition::new("asset_keys");

/// Per-project asset listing in insertion order: (project, AssetId) -> ()
const PROJECT_ASSETS: TableDefinition<(u64, u64), ()> = TableDefinition::new("project_assets");

/// Publication rows: PublicationId -> postcard Publication
const PUBLICATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("publications");

/// Pending mirror writes: sequence -> postcard MirrorOp
const OUTBOX: TableDefinition<u64, &[u8]> = TableDefinition::new("mirror_outbox");

/// Id counters: key -> last assigned value
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_RELATION: &str = "last_relation_id";
const LAST_PROJECT: &str = "last_project_id";
const LAST_ASSET: &str = "last_asset_id";
const LAST_PUBLICATION: &str = "last_publication_id";
const LAST_OUTBOX: &str = "last_outbox_seq";

/// Advance a counter inside an open write transaction.
fn bump(meta: &mut Table<'_, &'static str, u64>, key: &str) -> Result<u64, TdsError> {
    let current = meta
        .get(key)
        .map_err(TdsError::relational)?
        .map(|v| v.value())
        .unwrap_or(0);
    let next = current.saturating_add(1);
    meta.insert(key, next).map_err(TdsError::relational)?;
    Ok(next)
}

/// Insert one asset reference inside an open write transaction.
fn write_asset(
    write_txn: &WriteTransaction,
    project_id: ProjectId,
    resource_type: ResourceType,
    resource_id: &str,
) -> Result<AssetInsert, TdsError> {
    let mut keys = write_txn.open_table(ASSET_KEYS).map_err(TdsError::relational)?;
    let key = (project_id.0, resource_type.code(), resource_id);
    if keys.get(key).map_err(TdsError::relational)?.is_some() {
        return Ok(AssetInsert::Duplicate);
    }

    let mut meta = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
    let mut assets = write_txn.open_table(ASSETS).map_err(TdsError::relational)?;
    let mut listing = write_txn
        .open_table(PROJECT_ASSETS)
        .map_err(TdsError::relational)?;

    let row = ProjectAsset {
        id: AssetId(bump(&mut meta, LAST_ASSET)?),
        project_id,
        resource_type,
        resource_id: resource_id.to_string(),
    };
    assets
        .insert(row.id.0, encode(&row)?.as_slice())
        .map_err(TdsError::relational)?;
    keys.insert(key, row.id.0).map_err(TdsError::relational)?;
    listing
        .insert((project_id.0, row.id.0), ())
        .map_err(TdsError::relational)?;
    Ok(AssetInsert::Inserted(row))
}

/// A disk-backed relational store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a relational database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TdsError> {
        let db = Database::create(path.as_ref()).map_err(TdsError::relational)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(TdsError::relational)?;
            let _ = write_txn.open_table(RELATIONS).map_err(TdsError::relational)?;
            let _ = write_txn
                .open_table(RELATION_PAYLOADS)
                .map_err(TdsError::relational)?;
            let _ = write_txn.open_table(PROJECTS).map_err(TdsError::relational)?;
            let _ = write_txn.open_table(ASSETS).map_err(TdsError::relational)?;
            let _ = write_txn.open_table(ASSET_KEYS).map_err(TdsError::relational)?;
            let _ = write_txn
                .open_table(PROJECT_ASSETS)
                .map_err(TdsError::relational)?;
            let _ = write_txn.open_table(PUBLICATIONS).map_err(TdsError::relational)?;
            let _ = write_txn.open_table(OUTBOX).map_err(TdsError::relational)?;
            let _ = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
            write_txn.commit().map_err(TdsError::relational)?;
        }

        Ok(Self { db })
    }

    fn get_row<T: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        id: u64,
    ) -> Result<Option<T>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let table = read_txn.open_table(table).map_err(TdsError::relational)?;
        let row = table.get(id).map_err(TdsError::relational)?;
        row.map(|v| decode(v.value())).transpose()
    }

    fn table_len(&self, table: TableDefinition<u64, &[u8]>) -> Result<usize, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let table = read_txn.open_table(table).map_err(TdsError::relational)?;
        Ok(table.len().map_err(TdsError::relational)? as usize)
    }
}

impl RelationalStore for RedbStore {
    // =========================================================================
    // RELATIONS
    // =========================================================================

    fn insert_relation(&self, payload: &ProvenancePayload) -> Result<Relation, TdsError> {
        let key = encode(payload)?;
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let row = {
            let mut meta = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
            let mut relations = write_txn.open_table(RELATIONS).map_err(TdsError::relational)?;
            let mut payloads = write_txn
                .open_table(RELATION_PAYLOADS)
                .map_err(TdsError::relational)?;

            let id = RelationId(bump(&mut meta, LAST_RELATION)?);
            let row = Relation::from_payload(id, payload, Utc::now());
            relations
                .insert(id.0, encode(&row)?.as_slice())
                .map_err(TdsError::relational)?;

            let count = payloads
                .get(key.as_slice())
                .map_err(TdsError::relational)?
                .map(|v| v.value())
                .unwrap_or(0);
            payloads
                .insert(key.as_slice(), count.saturating_add(1))
                .map_err(TdsError::relational)?;
            row
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(row)
    }

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        self.get_row(RELATIONS, id.0)
    }

    fn delete_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let removed = {
            let mut relations = write_txn.open_table(RELATIONS).map_err(TdsError::relational)?;
            let removed: Option<Relation> = relations
                .remove(id.0)
                .map_err(TdsError::relational)?
                .map(|v| decode(v.value()))
                .transpose()?;

            if let Some(row) = &removed {
                let key = encode(&row.payload())?;
                let mut payloads = write_txn
                    .open_table(RELATION_PAYLOADS)
                    .map_err(TdsError::relational)?;
                let count = payloads
                    .get(key.as_slice())
                    .map_err(TdsError::relational)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                if count <= 1 {
                    payloads
                        .remove(key.as_slice())
                        .map_err(TdsError::relational)?;
                } else {
                    payloads
                        .insert(key.as_slice(), count - 1)
                        .map_err(TdsError::relational)?;
                }
            }
            removed
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(removed)
    }

    fn count_matching_relations(&self, payload: &ProvenancePayload) -> Result<usize, TdsError> {
        let key = encode(payload)?;
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let payloads = read_txn
            .open_table(RELATION_PAYLOADS)
            .map_err(TdsError::relational)?;
        Ok(payloads
            .get(key.as_slice())
            .map_err(TdsError::relational)?
            .map(|v| v.value())
            .unwrap_or(0) as usize)
    }

    fn relation_count(&self) -> Result<usize, TdsError> {
        self.table_len(RELATIONS)
    }

    // =========================================================================
    // PROJECTS
    // =========================================================================

    fn insert_project(&self, name: &str, description: &str) -> Result<Project, TdsError> {
        self.insert_project_with_assets(name, description, &[])
    }

    fn insert_project_with_assets(
        &self,
        name: &str,
        description: &str,
        assets: &[(ResourceType, String)],
    ) -> Result<Project, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let row = {
            let mut meta = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
            let mut projects = write_txn.open_table(PROJECTS).map_err(TdsError::relational)?;
            let row = Project {
                id: ProjectId(bump(&mut meta, LAST_PROJECT)?),
                name: name.to_string(),
                description: description.to_string(),
                active: true,
                created_at: Utc::now(),
            };
            projects
                .insert(row.id.0, encode(&row)?.as_slice())
                .map_err(TdsError::relational)?;
            row
        };
        for (resource_type, resource_id) in assets {
            write_asset(&write_txn, row.id, *resource_type, resource_id)?;
        }
        // Dropping an uncommitted transaction aborts it.
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(row)
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, TdsError> {
        self.get_row(PROJECTS, id.0)
    }

    fn list_projects(&self, offset: usize, limit: usize) -> Result<Vec<Project>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let projects = read_txn.open_table(PROJECTS).map_err(TdsError::relational)?;

        let mut out = Vec::new();
        for entry in projects
            .iter()
            .map_err(TdsError::relational)?
            .skip(offset)
            .take(limit)
        {
            let (_, value) = entry.map_err(TdsError::relational)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    fn update_project(&self, project: &Project) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let updated = {
            let mut projects = write_txn.open_table(PROJECTS).map_err(TdsError::relational)?;
            let exists = projects
                .get(project.id.0)
                .map_err(TdsError::relational)?
                .is_some();
            if exists {
                projects
                    .insert(project.id.0, encode(project)?.as_slice())
                    .map_err(TdsError::relational)?;
            }
            exists
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(updated)
    }

    fn set_project_active(&self, id: ProjectId, active: bool) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let updated = {
            let mut projects = write_txn.open_table(PROJECTS).map_err(TdsError::relational)?;
            let current: Option<Project> = projects
                .get(id.0)
                .map_err(TdsError::relational)?
                .map(|v| decode(v.value()))
                .transpose()?;
            match current {
                Some(mut row) => {
                    row.active = active;
                    projects
                        .insert(id.0, encode(&row)?.as_slice())
                        .map_err(TdsError::relational)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(updated)
    }

    fn project_count(&self) -> Result<usize, TdsError> {
        self.table_len(PROJECTS)
    }

    // =========================================================================
    // PROJECT ASSETS
    // =========================================================================

    fn insert_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<AssetInsert, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let outcome = write_asset(&write_txn, project_id, resource_type, resource_id)?;
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(outcome)
    }

    fn delete_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let deleted = {
            let mut keys = write_txn.open_table(ASSET_KEYS).map_err(TdsError::relational)?;
            let asset_id = keys
                .remove((project_id.0, resource_type.code(), resource_id))
                .map_err(TdsError::relational)?
                .map(|v| v.value());

            match asset_id {
                Some(asset_id) => {
                    let mut assets = write_txn.open_table(ASSETS).map_err(TdsError::relational)?;
                    let mut listing = write_txn
                        .open_table(PROJECT_ASSETS)
                        .map_err(TdsError::relational)?;
                    assets.remove(asset_id).map_err(TdsError::relational)?;
                    listing
                        .remove((project_id.0, asset_id))
                        .map_err(TdsError::relational)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(deleted)
    }

    fn list_assets(
        &self,
        project_id: ProjectId,
        types: &[ResourceType],
    ) -> Result<Vec<ProjectAsset>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let listing = read_txn
            .open_table(PROJECT_ASSETS)
            .map_err(TdsError::relational)?;
        let assets = read_txn.open_table(ASSETS).map_err(TdsError::relational)?;

        let mut out = Vec::new();
        for entry in listing
            .range((project_id.0, 0)..=(project_id.0, u64::MAX))
            .map_err(TdsError::relational)?
        {
            let (key, _) = entry.map_err(TdsError::relational)?;
            let (_, asset_id) = key.value();
            let Some(raw) = assets.get(asset_id).map_err(TdsError::relational)? else {
                continue;
            };
            let asset: ProjectAsset = decode(raw.value())?;
            if types.is_empty() || types.contains(&asset.resource_type) {
                out.push(asset);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // PUBLICATIONS
    // =========================================================================

    fn insert_publication(&self, draft: &PublicationDraft) -> Result<Publication, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let row = {
            let mut meta = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
            let mut publications = write_txn
                .open_table(PUBLICATIONS)
                .map_err(TdsError::relational)?;
            let row = Publication {
                id: PublicationId(bump(&mut meta, LAST_PUBLICATION)?),
                xdd_uri: draft.xdd_uri.clone(),
                title: draft.title.clone(),
            };
            publications
                .insert(row.id.0, encode(&row)?.as_slice())
                .map_err(TdsError::relational)?;
            row
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(row)
    }

    fn get_publication(&self, id: PublicationId) -> Result<Option<Publication>, TdsError> {
        self.get_row(PUBLICATIONS, id.0)
    }

    fn publications_in(&self, ids: &[PublicationId]) -> Result<Vec<Publication>, TdsError> {
        let wanted: BTreeSet<u64> = ids.iter().map(|id| id.0).collect();
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let publications = read_txn
            .open_table(PUBLICATIONS)
            .map_err(TdsError::relational)?;

        let mut out = Vec::with_capacity(wanted.len());
        for id in wanted {
            if let Some(raw) = publications.get(id).map_err(TdsError::relational)? {
                out.push(decode(raw.value())?);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // MIRROR OUTBOX
    // =========================================================================

    fn enqueue_mirror(&self, op: MirrorOp) -> Result<u64, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let seq = {
            let mut meta = write_txn.open_table(METADATA).map_err(TdsError::relational)?;
            let mut outbox = write_txn.open_table(OUTBOX).map_err(TdsError::relational)?;
            let seq = bump(&mut meta, LAST_OUTBOX)?;
            outbox
                .insert(seq, encode(&op)?.as_slice())
                .map_err(TdsError::relational)?;
            seq
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(seq)
    }

    fn pending_mirror(&self, limit: usize) -> Result<Vec<(u64, MirrorOp)>, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::relational)?;
        let outbox = read_txn.open_table(OUTBOX).map_err(TdsError::relational)?;

        let mut out = Vec::new();
        for entry in outbox.iter().map_err(TdsError::relational)?.take(limit) {
            let (seq, value) = entry.map_err(TdsError::relational)?;
            out.push((seq.value(), decode(value.value())?));
        }
        Ok(out)
    }

    fn ack_mirror(&self, seq: u64) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::relational)?;
        let removed = {
            let mut outbox = write_txn.open_table(OUTBOX).map_err(TdsError::relational)?;
            outbox.remove(seq).map_err(TdsError::relational)?.is_some()
        };
        write_txn.commit().map_err(TdsError::relational)?;
        Ok(removed)
    }

    fn outbox_len(&self) -> Result<usize, TdsError> {
        self.table_len(OUTBOX)
    }
}

// =============================================================================
// TESTS
// =============================================================================
