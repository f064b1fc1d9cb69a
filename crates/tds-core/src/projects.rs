//! # Projects
//!
//! Project bookkeeping on top of the relational store: creation with an
//! initial asset map, paged listing, field updates with asset
//! reconciliation, and deactivation.

use crate::assets::{AssetKey, ResourceAggregator};
use crate::primitives::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::relational::RelationalStore;
use crate::{Project, ProjectDraft, ProjectId, ResourceType, TdsError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// A project with its asset ids grouped by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(flatten)]
    pub project: Project,
    pub assets: BTreeMap<ResourceType, Vec<String>>,
}

pub struct ProjectRegistry {
    relational: Arc<dyn RelationalStore>,
    aggregator: Arc<ResourceAggregator>,
}

impl std::fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRegistry").finish_non_exhaustive()
    }
}

/// Parse every raw id in a draft's asset map, deduplicated, in draft order.
fn draft_keys(draft: &ProjectDraft) -> Result<Vec<AssetKey>, TdsError> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for (resource_type, ids) in &draft.assets {
        for raw in ids {
            let key = AssetKey::parse(*resource_type, raw)?;
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

impl ProjectRegistry {
    pub fn new(relational: Arc<dyn RelationalStore>, aggregator: Arc<ResourceAggregator>) -> Self {
        Self {
            relational,
            aggregator,
        }
    }

    fn require(&self, id: ProjectId) -> Result<Project, TdsError> {
        self.relational
            .get_project(id)?
            .ok_or_else(|| TdsError::not_found("project", id))
    }

    fn check_exist<'a>(&self, keys: impl IntoIterator<Item = &'a AssetKey>) -> Result<(), TdsError> {
        let mut missing = Vec::new();
        for key in keys {
            if !self.aggregator.asset_exists(key)? {
                missing.push(key.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TdsError::MissingAssets(missing.join(", ")))
        }
    }

    fn attach(&self, id: ProjectId, key: &AssetKey) -> Result<(), TdsError> {
        self.relational
            .insert_asset(id, key.resource_type(), &key.stored_id())?;
        Ok(())
    }

    /// Create a project and its initial assets.
    ///
    /// Every listed asset must exist in its owning store; otherwise nothing
    /// is written and `MissingAssets` names the absent ones. The project row
    /// and its asset rows commit together.
    pub fn create(&self, draft: &ProjectDraft) -> Result<ProjectId, TdsError> {
        draft.validate()?;
        let keys = draft_keys(draft)?;
        self.check_exist(&keys)?;

        let rows: Vec<(ResourceType, String)> = keys
            .iter()
            .map(|key| (key.resource_type(), key.stored_id()))
            .collect();
        let project = self.relational.insert_project_with_assets(
            draft.name.trim(),
            &draft.description,
            &rows,
        )?;
        info!(project = %project.id, assets = keys.len(), "project created");
        Ok(project.id)
    }

    /// A project and its asset ids grouped by type, in insertion order.
    pub fn get(&self, id: ProjectId) -> Result<ProjectRecord, TdsError> {
        let project = self.require(id)?;
        let mut assets: BTreeMap<ResourceType, Vec<String>> = BTreeMap::new();
        for asset in self.relational.list_assets(id, &[])? {
            assets
                .entry(asset.resource_type)
                .or_default()
                .push(asset.resource_id);
        }
        Ok(ProjectRecord { project, assets })
    }

    /// One page of projects in id order. A zero page size means the default.
    pub fn list(&self, page_size: usize, page: usize) -> Result<Vec<Project>, TdsError> {
        let size = match page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        self.relational
            .list_projects(page.saturating_mul(size), size)
    }

    /// Replace name and description, then reconcile the asset set with the
    /// draft: references missing from the draft are dropped and new ones
    /// added. New references must exist.
    pub fn update(&self, id: ProjectId, draft: &ProjectDraft) -> Result<Project, TdsError> {
        draft.validate()?;
        let mut project = self.require(id)?;
        let desired = draft_keys(draft)?;
        let wanted: BTreeSet<&AssetKey> = desired.iter().collect();

        let mut current = BTreeSet::new();
        for asset in self.relational.list_assets(id, &[])? {
            current.insert(AssetKey::parse(asset.resource_type, &asset.resource_id)?);
        }

        let added: Vec<&AssetKey> = desired.iter().filter(|k| !current.contains(*k)).collect();
        let removed: Vec<&AssetKey> = current.iter().filter(|k| !wanted.contains(k)).collect();
        self.check_exist(added.iter().copied())?;

        project.name = draft.name.trim().to_string();
        project.description = draft.description.clone();
        if !self.relational.update_project(&project)? {
            return Err(TdsError::not_found("project", id));
        }

        for key in &removed {
            self.relational
                .delete_asset(id, key.resource_type(), &key.stored_id())?;
        }
        for key in &added {
            self.attach(id, key)?;
        }

        info!(
            project = %id,
            added = added.len(),
            removed = removed.len(),
            "project updated"
        );
        Ok(project)
    }

    /// Mark a project inactive. The row and its assets are kept.
    pub fn deactivate(&self, id: ProjectId) -> Result<Project, TdsError> {
        if !self.relational.set_project_active(id, false)? {
            return Err(TdsError::not_found("project", id));
        }
        info!(project = %id, "project deactivated");
        self.require(id)
    }

    pub fn count(&self) -> Result<usize, TdsError> {
        self.relational.project_count()
    }
}
