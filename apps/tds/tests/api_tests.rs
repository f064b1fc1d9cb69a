//! Integration tests for the TDS HTTP API.
//!
//! Uses axum-test to exercise the router without binding a socket.

// Holding the env MutexGuard across await is intentional: tests that touch
// TDS_API_KEY are serialized through it.
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::sync::Mutex;
use tds::api::{
    AppState, CreatedResponse, DeletedResponse, DerivedFromResponse, DocumentResponse,
    ErrorResponse, HealthResponse, ProjectListResponse, PruneResponse, StatusResponse,
    create_router,
};
use tds_core::{
    Datastore, Project, ProjectAsset, ProjectRecord, Publication, Relation, ReplayReport,
    ResourceType, StorageBackend, StoreConfig,
};

/// Serializes tests since some of them modify env vars.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Holds the env mutex and clears auth settings on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("TDS_API_KEY") };
    }
}

fn server_with(store: Datastore, api_key: Option<&str>) -> (TestServer, TestGuard) {
    let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_MUTEX, so no concurrent env access.
    unsafe {
        match api_key {
            Some(key) => std::env::set_var("TDS_API_KEY", key),
            None => std::env::remove_var("TDS_API_KEY"),
        }
        std::env::set_var("TDS_RATE_LIMIT", "0");
    }
    let router = create_router(AppState::new(store));
    (TestServer::new(router).unwrap(), TestGuard { _guard: guard })
}

fn create_test_server() -> (TestServer, TestGuard) {
    server_with(Datastore::in_memory(), None)
}

fn relation_body(left: u64, right: u64, relation: &str) -> Value {
    json!({
        "left": left,
        "left_type": "datasets",
        "right": right,
        "right_type": "datasets",
        "relation_type": relation,
        "user_id": 1
    })
}

async fn put_document(server: &TestServer, resource_type: &str, id: &str, body: Value) {
    server
        .put(&format!("/documents/{resource_type}/{id}"))
        .json(&body)
        .await
        .assert_status(StatusCode::CREATED);
}

async fn create_project(server: &TestServer, body: Value) -> u64 {
    let response = server.post("/projects").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json::<CreatedResponse>().id
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_empty_store() {
    let (server, _guard) = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.backend, StorageBackend::Memory);
    assert_eq!(status.relation_count, 0);
    assert!(status.mirror_enabled);
    assert_eq!(status.graph_nodes, Some(0));
    assert_eq!(status.pending_mirror_ops, 0);
}

// =============================================================================
// PROVENANCE
// =============================================================================

#[tokio::test]
async fn test_create_and_retrieve_relation() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/provenance")
        .json(&json!({
            "left": 10,
            "left_type": "datasets",
            "right": 20,
            "right_type": "models",
            "relation_type": "derives",
            "user_id": 1
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: CreatedResponse = response.json();

    let response = server.get(&format!("/provenance/{}", created.id)).await;
    response.assert_status_ok();
    let row: Relation = response.json();
    assert_eq!(row.left, 10);
    assert_eq!(row.right_type, ResourceType::Models);

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.relation_count, 1);
    assert_eq!(status.graph_nodes, Some(2));
    assert_eq!(status.graph_edges, Some(1));
}

#[tokio::test]
async fn test_missing_endpoint_type_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/provenance")
        .json(&json!({
            "left": 1,
            "right": 2,
            "right_type": "models",
            "relation_type": "copies"
        }))
        .await;

    response.assert_status_bad_request();
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "invalid_relation");

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.relation_count, 0);
}

#[tokio::test]
async fn test_unknown_relation_is_not_found() {
    let (server, _guard) = create_test_server();

    server.get("/provenance/999").await.assert_status_not_found();
    server.delete("/provenance/999").await.assert_status_not_found();
}

#[tokio::test]
async fn test_delete_relation_removes_edge() {
    let (server, _guard) = create_test_server();

    let created: CreatedResponse = server
        .post("/provenance")
        .json(&relation_body(1, 2, "copies"))
        .await
        .json();

    let response = server.delete(&format!("/provenance/{}", created.id)).await;
    response.assert_status_ok();
    let deleted: DeletedResponse = response.json();
    assert!(deleted.deleted);

    server
        .get(&format!("/provenance/{}", created.id))
        .await
        .assert_status_not_found();
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.graph_edges, Some(0));

    let pruned: PruneResponse = server.post("/provenance/mirror/prune").await.json();
    assert_eq!(pruned.removed, 2);
}

#[tokio::test]
async fn test_derived_from_chain() {
    let (server, _guard) = create_test_server();

    for (left, right) in [(1, 2), (2, 3)] {
        server
            .post("/provenance")
            .json(&relation_body(left, right, "derivedfrom"))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let response = server
        .post("/provenance/derived-from")
        .json(&json!({"artifact_id": 1, "artifact_type": "datasets"}))
        .await;
    response.assert_status_ok();
    let result: DerivedFromResponse = response.json();
    let ids: Vec<u64> = result.derived_from.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[tokio::test]
async fn test_derived_from_without_mirror() {
    let store = Datastore::open(StoreConfig {
        graph_mirror: false,
        ..StoreConfig::memory()
    })
    .unwrap();
    let (server, _guard) = server_with(store, None);

    let response = server
        .post("/provenance/derived-from")
        .json(&json!({"artifact_id": 1, "artifact_type": "datasets"}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "graph_disabled");
}

#[tokio::test]
async fn test_replay_with_empty_outbox() {
    let (server, _guard) = create_test_server();

    let response = server.post("/provenance/mirror/replay").await;

    response.assert_status_ok();
    let report: ReplayReport = response.json();
    assert_eq!(report, ReplayReport::default());
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/provenance")
        .content_type("application/json")
        .bytes(bytes::Bytes::from("not valid json"))
        .await;

    assert!(response.status_code().is_client_error());
}

// =============================================================================
// PROJECTS
// =============================================================================

#[tokio::test]
async fn test_project_lifecycle() {
    let (server, _guard) = create_test_server();

    put_document(&server, "datasets", "ds-1", json!({"name": "Cases"})).await;
    let id = create_project(
        &server,
        json!({"name": "Epi", "description": "covid", "assets": {"datasets": ["ds-1"]}}),
    )
    .await;

    let record: ProjectRecord = server.get(&format!("/projects/{id}")).await.json();
    assert_eq!(record.project.name, "Epi");
    assert_eq!(record.assets[&ResourceType::Datasets], vec!["ds-1".to_string()]);

    let response = server
        .put(&format!("/projects/{id}"))
        .json(&json!({"name": "Epi 2", "assets": {}}))
        .await;
    response.assert_status_ok();
    let updated: Project = response.json();
    assert_eq!(updated.name, "Epi 2");

    let record: ProjectRecord = server.get(&format!("/projects/{id}")).await.json();
    assert!(record.assets.is_empty());

    let deactivated: Project = server.delete(&format!("/projects/{id}")).await.json();
    assert!(!deactivated.active);
}

#[tokio::test]
async fn test_project_with_missing_assets_rejected() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/projects")
        .json(&json!({"name": "Ghost", "assets": {"models": ["absent"]}}))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let list: ProjectListResponse = server.get("/projects").await.json();
    assert!(list.projects.is_empty());
}

#[tokio::test]
async fn test_project_listing_pages() {
    let (server, _guard) = create_test_server();

    for name in ["a", "b", "c"] {
        create_project(&server, json!({"name": name})).await;
    }

    let first: ProjectListResponse = server
        .get("/projects")
        .add_query_param("page_size", 2)
        .await
        .json();
    assert_eq!(first.projects.len(), 2);

    let second: ProjectListResponse = server
        .get("/projects")
        .add_query_param("page_size", 2)
        .add_query_param("page", 1)
        .await
        .json();
    assert_eq!(second.projects.len(), 1);
    assert_eq!(second.projects[0].name, "c");
}

// =============================================================================
// PROJECT ASSETS
// =============================================================================

#[tokio::test]
async fn test_two_datasets_resolve() {
    let (server, _guard) = create_test_server();

    put_document(&server, "datasets", "ds-a", json!({"name": "A"})).await;
    put_document(&server, "datasets", "ds-b", json!({"name": "B"})).await;
    let id = create_project(
        &server,
        json!({"name": "p", "assets": {"datasets": ["ds-a", "ds-b"]}}),
    )
    .await;

    let response = server
        .get(&format!("/projects/{id}/assets"))
        .add_query_param("types", "datasets")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let object = body.as_object().unwrap();
    assert_eq!(object.len(), 1);
    let names: Vec<&str> = body["datasets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test]
async fn test_all_types_present_when_unfiltered() {
    let (server, _guard) = create_test_server();

    let id = create_project(&server, json!({"name": "empty"})).await;
    let body: Value = server.get(&format!("/projects/{id}/assets")).await.json();

    let object = body.as_object().unwrap();
    assert_eq!(object.len(), ResourceType::ASSET_DEFAULTS.len());
    assert!(object.values().all(|v| v.as_array().is_some_and(Vec::is_empty)));
}

#[tokio::test]
async fn test_add_and_remove_asset() {
    let (server, _guard) = create_test_server();

    let publication: Publication = server
        .post("/publications")
        .json(&json!({"xdd_uri": "xdd://paper", "title": "Paper"}))
        .await
        .json();
    let id = create_project(&server, json!({"name": "p"})).await;
    let path = format!("/projects/{id}/assets/publications/{}", publication.id.0);

    let response = server.post(&path).await;
    response.assert_status(StatusCode::CREATED);
    let asset: ProjectAsset = response.json();
    assert_eq!(asset.resource_type, ResourceType::Publications);

    server.post(&path).await.assert_status(StatusCode::CONFLICT);

    let body: Value = server
        .get(&format!("/projects/{id}/assets"))
        .add_query_param("types", "publications")
        .await
        .json();
    assert_eq!(body["publications"][0]["title"], "Paper");

    server.delete(&path).await.assert_status(StatusCode::NO_CONTENT);
    server.delete(&path).await.assert_status_not_found();
}

#[tokio::test]
async fn test_asset_on_missing_project() {
    let (server, _guard) = create_test_server();

    server
        .post("/projects/42/assets/datasets/ds-1")
        .await
        .assert_status_not_found();
    server
        .get("/projects/42/assets")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_bad_asset_ids_and_types() {
    let (server, _guard) = create_test_server();
    let id = create_project(&server, json!({"name": "p"})).await;

    server
        .post(&format!("/projects/{id}/assets/publications/not-a-number"))
        .await
        .assert_status_bad_request();
    server
        .post(&format!("/projects/{id}/assets/widgets/1"))
        .await
        .assert_status_bad_request();
    server
        .get(&format!("/projects/{id}/assets"))
        .add_query_param("types", "projects")
        .await
        .assert_status_bad_request();
}

// =============================================================================
// DOCUMENTS & PUBLICATIONS
// =============================================================================

#[tokio::test]
async fn test_document_put_replace_delete() {
    let (server, _guard) = create_test_server();

    put_document(&server, "models", "sir", json!({"name": "SIR"})).await;

    let response = server
        .put("/documents/models/sir")
        .json(&json!({"name": "SIR v2"}))
        .await;
    response.assert_status_ok();
    let written: DocumentResponse = response.json();
    assert!(!written.created);

    server
        .delete("/documents/models/sir")
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .delete("/documents/models/sir")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_publications_not_indexable() {
    let (server, _guard) = create_test_server();

    server
        .put("/documents/publications/1")
        .json(&json!({"title": "x"}))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_publication_roundtrip() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/publications")
        .json(&json!({"xdd_uri": "xdd://42"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: Publication = response.json();

    let fetched: Publication = server
        .get(&format!("/publications/{}", created.id.0))
        .await
        .json();
    assert_eq!(fetched, created);
    server.get("/publications/77").await.assert_status_not_found();
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let api_key = "test-secret-key-12345";
    let (server, _guard) = server_with(Datastore::in_memory(), Some(api_key));

    let response = server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {api_key}").parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_valid_raw_token() {
    let api_key = "test-raw-key-67890";
    let (server, _guard) = server_with(Datastore::in_memory(), Some(api_key));

    let response = server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            api_key.parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_rejects_wrong_and_missing_keys() {
    let (server, _guard) = server_with(Datastore::in_memory(), Some("correct-key"));

    server
        .get("/status")
        .add_header(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .await
        .assert_status_unauthorized();

    server
        .post("/provenance")
        .json(&relation_body(1, 2, "copies"))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_auth_health_always_allowed() {
    let (server, _guard) = server_with(Datastore::in_memory(), Some("secret"));

    server.get("/health").await.assert_status_ok();
}
