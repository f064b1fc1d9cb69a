//! # API Request/Response Types
//!
//! JSON structures for the HTTP API, and the mapping from core errors to
//! HTTP statuses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tds_core::{
    DatastoreStats, NodeKey, Project, ResourceType, StorageBackend, TdsError,
    primitives::DEFAULT_PAGE_SIZE,
};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Store status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub backend: StorageBackend,
    pub relation_count: usize,
    pub project_count: usize,
    pub mirror_enabled: bool,
    pub graph_nodes: Option<usize>,
    pub graph_edges: Option<usize>,
    /// Set when mirroring is enabled but the graph store cannot be read.
    pub graph_error: Option<String>,
    pub pending_mirror_ops: usize,
}

impl From<DatastoreStats> for StatusResponse {
    fn from(stats: DatastoreStats) -> Self {
        Self {
            backend: stats.backend,
            relation_count: stats.relations,
            project_count: stats.projects,
            mirror_enabled: stats.mirror_enabled,
            graph_nodes: stats.graph.map(|g| g.nodes),
            graph_edges: stats.graph.map(|g| g.edges),
            graph_error: stats.graph_error,
            pending_mirror_ops: stats.pending_mirror_ops,
        }
    }
}

// =============================================================================
// PROVENANCE
// =============================================================================

/// Id of a newly created row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: u64,
    pub deleted: bool,
}

/// Derived-from search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedFromRequest {
    pub artifact_id: u64,
    pub artifact_type: ResourceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedFromResponse {
    pub artifact_id: u64,
    pub artifact_type: ResourceType,
    pub derived_from: Vec<NodeKey>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PruneResponse {
    pub removed: usize,
}

// =============================================================================
// PROJECTS & ASSETS
// =============================================================================

/// Paging parameters for `GET /projects`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub page_size: usize,
    pub page: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectListResponse {
    pub page: usize,
    pub page_size: usize,
    pub projects: Vec<Project>,
}

/// `?types=datasets,models` on `GET /projects/{id}/assets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsQuery {
    pub types: Option<String>,
}

impl AssetsQuery {
    /// Parse the comma-separated type list. Absent or blank means every
    /// asset type.
    pub fn resource_types(&self) -> Result<Vec<ResourceType>, TdsError> {
        match self.types.as_deref() {
            None => Ok(Vec::new()),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect(),
        }
    }
}

/// Result of writing a search document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub resource_type: ResourceType,
    pub id: String,
    pub created: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// A core error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub TdsError);

impl From<TdsError> for ApiError {
    fn from(e: TdsError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TdsError::InvalidRelation(_)
            | TdsError::InvalidAsset(_)
            | TdsError::InvalidProject(_)
            | TdsError::UnknownResourceType(_)
            | TdsError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            TdsError::NotFound { .. } => StatusCode::NOT_FOUND,
            TdsError::Conflict(_) => StatusCode::CONFLICT,
            TdsError::MissingAssets(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TdsError::StoreUnavailable { .. } | TdsError::GraphDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TdsError::MalformedDocument { .. } | TdsError::SerializationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            TdsError::InvalidRelation(_) => "invalid_relation",
            TdsError::NotFound { .. } => "not_found",
            TdsError::Conflict(_) => "conflict",
            TdsError::StoreUnavailable { .. } => "store_unavailable",
            TdsError::MalformedDocument { .. } => "malformed_document",
            TdsError::InvalidAsset(_) => "invalid_asset",
            TdsError::MissingAssets(_) => "missing_assets",
            TdsError::InvalidProject(_) => "invalid_project",
            TdsError::UnknownResourceType(_) => "unknown_resource_type",
            TdsError::GraphDisabled => "graph_disabled",
            TdsError::SerializationError(_) => "serialization_error",
            TdsError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
