//! # API Endpoint Handlers
//!
//! Each handler is a thin call into the shared [`Datastore`]; errors leave
//! through [`ApiError`].
//!
//! [`Datastore`]: tds_core::Datastore

use super::{
    AppState,
    types::{
        ApiError, AssetsQuery, CreatedResponse, DeletedResponse, DerivedFromRequest,
        DerivedFromResponse, DocumentResponse, HealthResponse, ListQuery, ProjectListResponse,
        PruneResponse, StatusResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tds_core::{
    AssetMap, Document, Project, ProjectAsset, ProjectDraft, ProjectId, ProjectRecord,
    Publication, PublicationDraft, PublicationId, Relation, RelationDraft, RelationId,
    ReplayReport, ResourceType, TdsError,
};

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(state.store.stats()?.into()))
}

// =============================================================================
// PROVENANCE
// =============================================================================

pub async fn create_relation_handler(
    State(state): State<AppState>,
    Json(draft): Json<RelationDraft>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let id = state.store.provenance().create(&draft)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

pub async fn get_relation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Relation>> {
    state
        .store
        .provenance()
        .retrieve(RelationId(id))?
        .map(Json)
        .ok_or_else(|| TdsError::not_found("relation", id).into())
}

pub async fn delete_relation_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<DeletedResponse>> {
    if state.store.provenance().delete(RelationId(id))? {
        Ok(Json(DeletedResponse { id, deleted: true }))
    } else {
        Err(TdsError::not_found("relation", id).into())
    }
}

pub async fn derived_from_handler(
    State(state): State<AppState>,
    Json(request): Json<DerivedFromRequest>,
) -> ApiResult<Json<DerivedFromResponse>> {
    let derived_from = state
        .store
        .provenance()
        .search_derived_from(request.artifact_id, request.artifact_type)?;
    Ok(Json(DerivedFromResponse {
        artifact_id: request.artifact_id,
        artifact_type: request.artifact_type,
        derived_from,
    }))
}

pub async fn replay_handler(State(state): State<AppState>) -> ApiResult<Json<ReplayReport>> {
    Ok(Json(state.store.provenance().replay_outbox()?))
}

pub async fn prune_handler(State(state): State<AppState>) -> ApiResult<Json<PruneResponse>> {
    let removed = state.store.provenance().prune_orphan_nodes()?;
    Ok(Json(PruneResponse { removed }))
}

// =============================================================================
// PROJECTS
// =============================================================================

pub async fn list_projects_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ProjectListResponse>> {
    let projects = state.store.projects().list(query.page_size, query.page)?;
    Ok(Json(ProjectListResponse {
        page: query.page,
        page_size: query.page_size,
        projects,
    }))
}

pub async fn create_project_handler(
    State(state): State<AppState>,
    Json(draft): Json<ProjectDraft>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let id = state.store.projects().create(&draft)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

pub async fn get_project_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ProjectRecord>> {
    Ok(Json(state.store.projects().get(ProjectId(id))?))
}

pub async fn update_project_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(draft): Json<ProjectDraft>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.store.projects().update(ProjectId(id), &draft)?))
}

pub async fn deactivate_project_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.store.projects().deactivate(ProjectId(id))?))
}

// =============================================================================
// PROJECT ASSETS
// =============================================================================

pub async fn project_assets_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<AssetsQuery>,
) -> ApiResult<Json<AssetMap>> {
    let types = query.resource_types()?;
    Ok(Json(
        state.store.aggregator().resolve_assets(ProjectId(id), &types)?,
    ))
}

pub async fn add_asset_handler(
    State(state): State<AppState>,
    Path((id, resource_type, resource_id)): Path<(u64, String, String)>,
) -> ApiResult<(StatusCode, Json<ProjectAsset>)> {
    let resource_type: ResourceType = resource_type.parse()?;
    let asset = state
        .store
        .aggregator()
        .add_asset(ProjectId(id), resource_type, &resource_id)?;
    Ok((StatusCode::CREATED, Json(asset)))
}

pub async fn remove_asset_handler(
    State(state): State<AppState>,
    Path((id, resource_type, resource_id)): Path<(u64, String, String)>,
) -> ApiResult<StatusCode> {
    let resource_type: ResourceType = resource_type.parse()?;
    state
        .store
        .aggregator()
        .remove_asset(ProjectId(id), resource_type, &resource_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PUBLICATIONS
// =============================================================================

pub async fn create_publication_handler(
    State(state): State<AppState>,
    Json(draft): Json<PublicationDraft>,
) -> ApiResult<(StatusCode, Json<Publication>)> {
    let row = state.store.create_publication(&draft)?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn get_publication_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Publication>> {
    state
        .store
        .get_publication(PublicationId(id))?
        .map(Json)
        .ok_or_else(|| TdsError::not_found("publication", id).into())
}

// =============================================================================
// SEARCH DOCUMENTS
// =============================================================================

/// Write a search document. 201 when new, 200 when replaced.
pub async fn put_document_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(document): Json<Document>,
) -> ApiResult<(StatusCode, Json<DocumentResponse>)> {
    let resource_type: ResourceType = resource_type.parse()?;
    let created = state
        .store
        .aggregator()
        .index_document(resource_type, &id, document)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(DocumentResponse {
            resource_type,
            id,
            created,
        }),
    ))
}

pub async fn delete_document_handler(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let resource_type: ResourceType = resource_type.parse()?;
    if state.store.aggregator().remove_document(resource_type, &id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TdsError::not_found("document", format!("{resource_type}/{id}")).into())
    }
}
