//! # Resource Aggregator
//!
//! Resolves a project's asset references to full, typed representations.
//!
//! Each resource type is owned by exactly one backing store, fixed by
//! [`route`]:
//!
//! | Type | Store | Lookup |
//! |------|-------|--------|
//! | `publications` | relational | `IN` query on publication ids |
//! | every other asset type | search index | multi-id lookup in `{prefix}{label}` |
//!
//! Asset references keep their id as a string; [`AssetKey::parse`] turns it
//! into the id domain of the owning store.

use crate::primitives::{DEFAULT_INDEX_PREFIX, MAX_LOOKUP_IDS};
use crate::relational::RelationalStore;
use crate::search::{Document, SearchIndex};
use crate::shaping::{
    AssetView, MODEL_LIST_FIELDS, PublicationView, Shaper, shape_artifact, shape_configuration,
    shape_dataset, shape_model, shape_simulation, shape_workflow,
};
use crate::{
    AssetInsert, ProjectAsset, ProjectId, PublicationId, ResourceType, TdsError,
    validate_resource_id,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolved assets, one entry per requested type.
pub type AssetMap = BTreeMap<ResourceType, Vec<AssetView>>;

// =============================================================================
// ROUTING TABLE
// =============================================================================

/// How a resource type is resolved.
#[derive(Debug, Clone, Copy)]
pub enum Route {
    /// Multi-id lookup in the search index, shaped per type.
    Indexed {
        fields: Option<&'static [&'static str]>,
        shape: Shaper,
    },
    /// `IN` query against the relational store.
    Relational,
}

/// The owning store of each asset type. `projects` is not an asset type.
pub fn route(resource_type: ResourceType) -> Result<Route, TdsError> {
    let route = match resource_type {
        ResourceType::Publications => Route::Relational,
        ResourceType::Models => Route::Indexed {
            fields: Some(MODEL_LIST_FIELDS),
            shape: shape_model,
        },
        ResourceType::Datasets => Route::Indexed {
            fields: None,
            shape: shape_dataset,
        },
        ResourceType::ModelConfigurations => Route::Indexed {
            fields: None,
            shape: shape_configuration,
        },
        ResourceType::Simulations => Route::Indexed {
            fields: None,
            shape: shape_simulation,
        },
        ResourceType::Workflows => Route::Indexed {
            fields: None,
            shape: shape_workflow,
        },
        ResourceType::Artifacts => Route::Indexed {
            fields: None,
            shape: shape_artifact,
        },
        ResourceType::Projects => {
            return Err(TdsError::InvalidAsset(
                "projects cannot be project assets".to_string(),
            ));
        }
    };
    Ok(route)
}

// =============================================================================
// ASSET KEY
// =============================================================================

/// A typed asset reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "store", rename_all = "snake_case")]
pub enum AssetKey {
    Indexed {
        resource_type: ResourceType,
        id: String,
    },
    Relational {
        resource_type: ResourceType,
        id: u64,
    },
}

impl AssetKey {
    /// Parse a raw id against the routing table.
    pub fn parse(resource_type: ResourceType, raw: &str) -> Result<Self, TdsError> {
        validate_resource_id(raw)?;
        match route(resource_type)? {
            Route::Indexed { .. } => Ok(AssetKey::Indexed {
                resource_type,
                id: raw.to_string(),
            }),
            Route::Relational => {
                let id = raw.trim().parse::<u64>().map_err(|_| {
                    TdsError::InvalidAsset(format!(
                        "{resource_type} ids are integers, got '{raw}'"
                    ))
                })?;
                Ok(AssetKey::Relational { resource_type, id })
            }
        }
    }

    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        match self {
            AssetKey::Indexed { resource_type, .. } | AssetKey::Relational { resource_type, .. } => {
                *resource_type
            }
        }
    }

    /// Canonical string form stored in asset rows.
    #[must_use]
    pub fn stored_id(&self) -> String {
        match self {
            AssetKey::Indexed { id, .. } => id.clone(),
            AssetKey::Relational { id, .. } => id.to_string(),
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type(), self.stored_id())
    }
}

// =============================================================================
// AGGREGATOR
// =============================================================================

/// Resolves asset references across the relational store and search index.
pub struct ResourceAggregator {
    relational: Arc<dyn RelationalStore>,
    index: Arc<dyn SearchIndex>,
    index_prefix: String,
}

impl fmt::Debug for ResourceAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAggregator")
            .field("index_prefix", &self.index_prefix)
            .finish_non_exhaustive()
    }
}

impl ResourceAggregator {
    pub fn new(relational: Arc<dyn RelationalStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            relational,
            index,
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    /// Search collection holding documents of `resource_type`.
    #[must_use]
    pub fn collection(&self, resource_type: ResourceType) -> String {
        format!("{}{}", self.index_prefix, resource_type.label())
    }

    fn require_project(&self, project_id: ProjectId) -> Result<(), TdsError> {
        match self.relational.get_project(project_id)? {
            Some(_) => Ok(()),
            None => Err(TdsError::not_found("project", project_id)),
        }
    }

    /// Resolve every asset of `project_id` whose type is in `types`.
    ///
    /// Every requested type appears in the result, empty if the project has
    /// no asset of that type. An empty `types` means every asset type.
    /// Sequences follow asset insertion order. Any failing type fails the
    /// whole call.
    pub fn resolve_assets(
        &self,
        project_id: ProjectId,
        types: &[ResourceType],
    ) -> Result<AssetMap, TdsError> {
        self.require_project(project_id)?;

        let requested: &[ResourceType] = if types.is_empty() {
            &ResourceType::ASSET_DEFAULTS
        } else {
            types
        };

        let mut grouped: BTreeMap<ResourceType, Vec<String>> = BTreeMap::new();
        for resource_type in requested {
            route(*resource_type)?;
            grouped.entry(*resource_type).or_default();
        }

        for asset in self.relational.list_assets(project_id, requested)? {
            grouped
                .entry(asset.resource_type)
                .or_default()
                .push(asset.resource_id);
        }

        let mut resolved = AssetMap::new();
        for (resource_type, ids) in grouped {
            let views = self.resolve_type(resource_type, &ids)?;
            debug!(
                project = %project_id,
                resource_type = %resource_type,
                references = ids.len(),
                resolved = views.len(),
                "asset type resolved"
            );
            resolved.insert(resource_type, views);
        }
        Ok(resolved)
    }

    fn resolve_type(
        &self,
        resource_type: ResourceType,
        ids: &[String],
    ) -> Result<Vec<AssetView>, TdsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        match route(resource_type)? {
            Route::Indexed { fields, shape } => {
                let collection = self.collection(resource_type);
                let mut views = Vec::with_capacity(ids.len());
                // Stored references are not capped; lookups are.
                for chunk in ids.chunks(MAX_LOOKUP_IDS) {
                    let hits = self.index.get_many(&collection, chunk, fields)?;
                    if hits.total == 0 {
                        continue;
                    }
                    for hit in hits.hits {
                        views.push(shape(&collection, hit)?);
                    }
                }
                Ok(views)
            }
            Route::Relational => {
                let wanted = ids
                    .iter()
                    .map(|raw| match AssetKey::parse(resource_type, raw)? {
                        AssetKey::Relational { id, .. } => Ok(PublicationId(id)),
                        AssetKey::Indexed { .. } => Err(TdsError::InvalidAsset(raw.clone())),
                    })
                    .collect::<Result<Vec<_>, TdsError>>()?;

                let mut rows = BTreeMap::new();
                for chunk in wanted.chunks(MAX_LOOKUP_IDS) {
                    for row in self.relational.publications_in(chunk)? {
                        rows.insert(row.id, row);
                    }
                }

                // Back into reference order.
                Ok(wanted
                    .iter()
                    .filter_map(|id| rows.remove(id))
                    .map(|row| AssetView::Publication(PublicationView::from(row)))
                    .collect())
            }
        }
    }

    fn indexed_collection(&self, resource_type: ResourceType) -> Result<String, TdsError> {
        match route(resource_type)? {
            Route::Indexed { .. } => Ok(self.collection(resource_type)),
            Route::Relational => Err(TdsError::InvalidAsset(format!(
                "{resource_type} are stored relationally, not in the search index"
            ))),
        }
    }

    /// Write a search document for an indexed type. Returns `true` if new.
    pub fn index_document(
        &self,
        resource_type: ResourceType,
        id: &str,
        document: Document,
    ) -> Result<bool, TdsError> {
        validate_resource_id(id)?;
        let collection = self.indexed_collection(resource_type)?;
        self.index.put(&collection, id, document)
    }

    pub fn remove_document(&self, resource_type: ResourceType, id: &str) -> Result<bool, TdsError> {
        let collection = self.indexed_collection(resource_type)?;
        self.index.remove(&collection, id)
    }

    /// Whether the resource an asset key points at exists in its store.
    pub fn asset_exists(&self, key: &AssetKey) -> Result<bool, TdsError> {
        match key {
            AssetKey::Indexed { resource_type, id } => {
                self.index.contains(&self.collection(*resource_type), id)
            }
            AssetKey::Relational { id, .. } => Ok(self
                .relational
                .get_publication(PublicationId(*id))?
                .is_some()),
        }
    }

    /// Attach a resource to a project.
    pub fn add_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        raw_id: &str,
    ) -> Result<ProjectAsset, TdsError> {
        self.require_project(project_id)?;
        let key = AssetKey::parse(resource_type, raw_id)?;

        match self
            .relational
            .insert_asset(project_id, resource_type, &key.stored_id())?
        {
            AssetInsert::Inserted(asset) => {
                info!(project = %project_id, asset = %key, "asset added");
                Ok(asset)
            }
            AssetInsert::Duplicate => Err(TdsError::Conflict(format!(
                "project {project_id} already references {key}"
            ))),
        }
    }

    /// Detach a resource from a project.
    pub fn remove_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        raw_id: &str,
    ) -> Result<(), TdsError> {
        let not_found =
            || TdsError::not_found("asset", format!("{project_id}/{resource_type}/{raw_id}"));
        let key = AssetKey::parse(resource_type, raw_id).map_err(|_| not_found())?;

        if self
            .relational
            .delete_asset(project_id, resource_type, &key.stored_id())?
        {
            info!(project = %project_id, asset = %key, "asset removed");
            Ok(())
        } else {
            Err(not_found())
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
