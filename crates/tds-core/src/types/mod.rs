//! # Core Type Definitions
//!
//! This module contains the records and tags shared by every part of the core:
//! - Identifiers (`RelationId`, `ProjectId`, `AssetId`, `PublicationId`, `UserId`)
//! - Resource and relation tags (`ResourceType`, `RelationType`)
//! - Provenance records (`RelationDraft`, `ProvenancePayload`, `Relation`, `MirrorOp`)
//! - Graph mirror keys (`NodeKey`, `EdgeKey`)
//! - Project records (`Project`, `ProjectDraft`, `ProjectAsset`)
//! - Relational resources (`Publication`, `PublicationDraft`)
//! - Error types (`TdsError`)
//!
//! ## Storage Codes
//!
//! `ResourceType` and `RelationType` carry a one-byte code used in redb keys.
//! Codes are append-only: never renumber an existing variant.

use crate::primitives::{MAX_NAME_LENGTH, MAX_RESOURCE_ID_LENGTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Surrogate key of a provenance relation, assigned by the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub u64);

/// Surrogate key of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

/// Surrogate key of a project asset reference row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

/// Surrogate key of a publication row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicationId(pub u64);

/// The user recorded on a relation (and on its mirrored graph edge).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RESOURCE TYPE
// =============================================================================

/// Discriminator naming the domain entity an id refers to.
///
/// The wire form is the plural tag (`datasets`). The singular label
/// (`dataset`) is accepted on input, labels graph-mirror nodes and suffixes
/// search-index collection names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[serde(alias = "dataset")]
    Datasets,
    #[serde(alias = "model")]
    Models,
    #[serde(alias = "model_configuration")]
    ModelConfigurations,
    #[serde(alias = "publication")]
    Publications,
    #[serde(alias = "simulation")]
    Simulations,
    #[serde(alias = "workflow")]
    Workflows,
    #[serde(alias = "artifact")]
    Artifacts,
    #[serde(alias = "project")]
    Projects,
}

impl ResourceType {
    /// Every resource type, in storage-code order.
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Datasets,
        ResourceType::Models,
        ResourceType::ModelConfigurations,
        ResourceType::Publications,
        ResourceType::Simulations,
        ResourceType::Workflows,
        ResourceType::Artifacts,
        ResourceType::Projects,
    ];

    /// Types a project asset listing returns when the caller names none.
    pub const ASSET_DEFAULTS: [ResourceType; 7] = [
        ResourceType::Datasets,
        ResourceType::Models,
        ResourceType::ModelConfigurations,
        ResourceType::Publications,
        ResourceType::Simulations,
        ResourceType::Workflows,
        ResourceType::Artifacts,
    ];

    /// Plural wire tag.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceType::Datasets => "datasets",
            ResourceType::Models => "models",
            ResourceType::ModelConfigurations => "model_configurations",
            ResourceType::Publications => "publications",
            ResourceType::Simulations => "simulations",
            ResourceType::Workflows => "workflows",
            ResourceType::Artifacts => "artifacts",
            ResourceType::Projects => "projects",
        }
    }

    /// Singular label used for graph nodes and index collections.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::Datasets => "dataset",
            ResourceType::Models => "model",
            ResourceType::ModelConfigurations => "model_configuration",
            ResourceType::Publications => "publication",
            ResourceType::Simulations => "simulation",
            ResourceType::Workflows => "workflow",
            ResourceType::Artifacts => "artifact",
            ResourceType::Projects => "project",
        }
    }

    /// Stable storage code.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            ResourceType::Datasets => 1,
            ResourceType::Models => 2,
            ResourceType::ModelConfigurations => 3,
            ResourceType::Publications => 4,
            ResourceType::Simulations => 5,
            ResourceType::Workflows => 6,
            ResourceType::Artifacts => 7,
            ResourceType::Projects => 8,
        }
    }

    /// Inverse of [`ResourceType::code`].
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ResourceType {
    type Err = TdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == trimmed || t.label() == trimmed)
            .ok_or_else(|| TdsError::UnknownResourceType(trimmed.to_string()))
    }
}

// =============================================================================
// RELATION TYPE
// =============================================================================

/// Label of a provenance edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Copies,
    Derives,
    Glued,
    Parents,
    /// Followed by derived-from searches.
    #[serde(alias = "derived_from")]
    DerivedFrom,
}

impl RelationType {
    /// Every relation type, in storage-code order.
    pub const ALL: [RelationType; 5] = [
        RelationType::Copies,
        RelationType::Derives,
        RelationType::Glued,
        RelationType::Parents,
        RelationType::DerivedFrom,
    ];

    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            RelationType::Copies => "copies",
            RelationType::Derives => "derives",
            RelationType::Glued => "glued",
            RelationType::Parents => "parents",
            RelationType::DerivedFrom => "derivedfrom",
        }
    }

    /// Stable storage code.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            RelationType::Copies => 1,
            RelationType::Derives => 2,
            RelationType::Glued => 3,
            RelationType::Parents => 4,
            RelationType::DerivedFrom => 5,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RelationType {
    type Err = TdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "derived_from" {
            return Ok(RelationType::DerivedFrom);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == trimmed)
            .ok_or_else(|| TdsError::InvalidRelation(format!("unknown relation type '{trimmed}'")))
    }
}

// =============================================================================
// GRAPH MIRROR KEYS
// =============================================================================

/// Identity of a mirrored node: `(label, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: ResourceType,
    pub id: u64,
}

impl NodeKey {
    #[must_use]
    pub const fn new(label: ResourceType, id: u64) -> Self {
        Self { label, id }
    }
}

/// Identity of a mirrored edge. Two relations with the same endpoints,
/// label and user map onto the same edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeKey,
    pub relation: RelationType,
    pub to: NodeKey,
    pub user_id: UserId,
}

// =============================================================================
// PROVENANCE RECORDS
// =============================================================================

/// An unvalidated relation creation request.
///
/// Endpoint types are optional here because callers may omit them; a draft
/// with a missing endpoint type is rejected before any store is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDraft {
    pub left: u64,
    #[serde(default)]
    pub left_type: Option<ResourceType>,
    pub right: u64,
    #[serde(default)]
    pub right_type: Option<ResourceType>,
    pub relation_type: RelationType,
    #[serde(default)]
    pub user_id: UserId,
}

impl RelationDraft {
    /// Check both endpoint types are present and produce the payload.
    pub fn validate(&self) -> Result<ProvenancePayload, TdsError> {
        let left_type = self
            .left_type
            .ok_or_else(|| TdsError::InvalidRelation("missing left_type".to_string()))?;
        let right_type = self
            .right_type
            .ok_or_else(|| TdsError::InvalidRelation("missing right_type".to_string()))?;

        Ok(ProvenancePayload {
            left: self.left,
            left_type,
            right: self.right,
            right_type,
            relation_type: self.relation_type,
            user_id: self.user_id,
        })
    }
}

/// The validated content of a relation. Also the replay key for the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProvenancePayload {
    pub left: u64,
    pub left_type: ResourceType,
    pub right: u64,
    pub right_type: ResourceType,
    pub relation_type: RelationType,
    pub user_id: UserId,
}

impl ProvenancePayload {
    #[must_use]
    pub const fn left_node(&self) -> NodeKey {
        NodeKey::new(self.left_type, self.left)
    }

    #[must_use]
    pub const fn right_node(&self) -> NodeKey {
        NodeKey::new(self.right_type, self.right)
    }

    /// The mirrored edge this payload maps onto.
    #[must_use]
    pub const fn edge(&self) -> EdgeKey {
        EdgeKey {
            from: self.left_node(),
            relation: self.relation_type,
            to: self.right_node(),
            user_id: self.user_id,
        }
    }
}

/// A stored relation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub left: u64,
    pub left_type: ResourceType,
    pub right: u64,
    pub right_type: ResourceType,
    pub relation_type: RelationType,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Build a row from a payload and the store-assigned id.
    #[must_use]
    pub fn from_payload(id: RelationId, payload: &ProvenancePayload, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            left: payload.left,
            left_type: payload.left_type,
            right: payload.right,
            right_type: payload.right_type,
            relation_type: payload.relation_type,
            user_id: payload.user_id,
            created_at,
        }
    }

    /// The key used at creation time, replayed on deletion.
    #[must_use]
    pub const fn payload(&self) -> ProvenancePayload {
        ProvenancePayload {
            left: self.left,
            left_type: self.left_type,
            right: self.right,
            right_type: self.right_type,
            relation_type: self.relation_type,
            user_id: self.user_id,
        }
    }
}

/// A mirror write that failed and waits in the outbox for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorOp {
    Create(ProvenancePayload),
    Delete(ProvenancePayload),
}

impl MirrorOp {
    #[must_use]
    pub const fn payload(&self) -> &ProvenancePayload {
        match self {
            MirrorOp::Create(p) | MirrorOp::Delete(p) => p,
        }
    }
}

// =============================================================================
// PROJECT RECORDS
// =============================================================================

/// A stored project row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Project creation / update request, including the asset map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assets: BTreeMap<ResourceType, Vec<String>>,
}

impl ProjectDraft {
    /// Validate field lengths and asset ids.
    pub fn validate(&self) -> Result<(), TdsError> {
        if self.name.trim().is_empty() {
            return Err(TdsError::InvalidProject("name must not be empty".to_string()));
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(TdsError::InvalidProject(format!(
                "name length {} exceeds maximum {} bytes",
                self.name.len(),
                MAX_NAME_LENGTH
            )));
        }
        for ids in self.assets.values() {
            for id in ids {
                validate_resource_id(id)?;
            }
        }
        Ok(())
    }
}

/// A polymorphic pointer from a project to a resource.
///
/// `resource_id` stays a string so integer and opaque identifier domains
/// share one column; it is parsed against the routing table on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAsset {
    pub id: AssetId,
    pub project_id: ProjectId,
    pub resource_type: ResourceType,
    pub resource_id: String,
}

/// Outcome of an insert-if-absent asset write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetInsert {
    Inserted(ProjectAsset),
    Duplicate,
}

/// Check a raw resource id is usable as an asset reference.
pub fn validate_resource_id(id: &str) -> Result<(), TdsError> {
    if id.trim().is_empty() {
        return Err(TdsError::InvalidAsset("resource id must not be empty".to_string()));
    }
    if id.len() > MAX_RESOURCE_ID_LENGTH {
        return Err(TdsError::InvalidAsset(format!(
            "resource id length {} exceeds maximum {} bytes",
            id.len(),
            MAX_RESOURCE_ID_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// RELATIONAL RESOURCES
// =============================================================================

/// A publication row, the relationally-stored asset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    pub xdd_uri: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationDraft {
    pub xdd_uri: String,
    #[serde(default)]
    pub title: String,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the TDS core.
///
/// Store failures carry the store name so callers can tell an
/// authoritative-write failure from a mirror or index failure.
#[derive(Debug, Error)]
pub enum TdsError {
    /// A relation was rejected before any store access.
    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    /// Lookup by id or container yielded no row.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Duplicate insert detected by a pre-insert existence check.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A backing store could not serve the request.
    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },

    /// A search document could not be shaped into its wire representation.
    #[error("Malformed document {id} in {collection}: {reason}")]
    MalformedDocument {
        collection: String,
        id: String,
        reason: String,
    },

    /// An asset reference does not fit its resource type's id domain.
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    /// Some assets listed for a new project do not exist.
    #[error("Not all listed assets exist: {0}")]
    MissingAssets(String),

    /// Project payload failed validation.
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    /// A graph-only query was issued against a datastore with no mirror.
    #[error("Graph mirroring is disabled")]
    GraphDisabled,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TdsError {
    pub fn relational(reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: "relational",
            reason: reason.to_string(),
        }
    }

    pub fn graph(reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: "graph",
            reason: reason.to_string(),
        }
    }

    pub fn search(reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: "search",
            reason: reason.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_codes_round_trip() {
        for t in ResourceType::ALL {
            assert_eq!(ResourceType::from_code(t.code()), Some(t));
        }
        assert_eq!(ResourceType::from_code(0), None);
    }

    #[test]
    fn resource_type_parses_tag_and_label() {
        assert_eq!("datasets".parse::<ResourceType>().ok(), Some(ResourceType::Datasets));
        assert_eq!("dataset".parse::<ResourceType>().ok(), Some(ResourceType::Datasets));
        assert_eq!(
            "model_configuration".parse::<ResourceType>().ok(),
            Some(ResourceType::ModelConfigurations)
        );
        assert!("plans".parse::<ResourceType>().is_err());
    }

    #[test]
    fn resource_type_serde_accepts_singular() {
        let parsed: ResourceType = serde_json::from_str("\"model\"").expect("parse");
        assert_eq!(parsed, ResourceType::Models);
        let out = serde_json::to_string(&ResourceType::ModelConfigurations).expect("ser");
        assert_eq!(out, "\"model_configurations\"");
    }

    #[test]
    fn relation_type_tags() {
        assert_eq!(RelationType::DerivedFrom.tag(), "derivedfrom");
        assert_eq!(
            "derived_from".parse::<RelationType>().ok(),
            Some(RelationType::DerivedFrom)
        );
        let out = serde_json::to_string(&RelationType::DerivedFrom).expect("ser");
        assert_eq!(out, "\"derivedfrom\"");
        assert!("cites".parse::<RelationType>().is_err());
    }

    #[test]
    fn draft_missing_type_is_invalid_relation() {
        let draft = RelationDraft {
            left: 1,
            left_type: None,
            right: 2,
            right_type: Some(ResourceType::Models),
            relation_type: RelationType::Derives,
            user_id: UserId(1),
        };
        assert!(matches!(draft.validate(), Err(TdsError::InvalidRelation(_))));
    }

    #[test]
    fn payload_edge_key() {
        let payload = ProvenancePayload {
            left: 10,
            left_type: ResourceType::Datasets,
            right: 20,
            right_type: ResourceType::Models,
            relation_type: RelationType::Derives,
            user_id: UserId(1),
        };
        let edge = payload.edge();
        assert_eq!(edge.from, NodeKey::new(ResourceType::Datasets, 10));
        assert_eq!(edge.to, NodeKey::new(ResourceType::Models, 20));
        assert_eq!(edge.user_id, UserId(1));
    }

    #[test]
    fn project_draft_rejects_empty_name() {
        let draft = ProjectDraft::default();
        assert!(matches!(draft.validate(), Err(TdsError::InvalidProject(_))));
    }

    #[test]
    fn project_draft_assets_from_json() {
        let draft: ProjectDraft = serde_json::from_str(
            r#"{"name":"p","assets":{"datasets":["a","b"],"publications":["3"]}}"#,
        )
        .expect("parse");
        assert_eq!(draft.assets.len(), 2);
        assert!(draft.validate().is_ok());
    }
}
