//! # Aggregation Tests
//!
//! Routing of asset types to their backing store, observed through
//! counting wrappers, plus the redb-backed path end to end.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tds_core::{
    AssetInsert, AssetView, Datastore, Document, MemoryIndex, MemoryStore, MirrorOp, Project,
    ProjectAsset, ProjectDraft, ProjectId, ProvenancePayload, Publication, PublicationDraft,
    PublicationId, Relation, RelationId, RelationalStore, ResourceAggregator, ResourceType,
    SearchHits, SearchIndex, StoreConfig, TdsError, primitives::MAX_LOOKUP_IDS,
};
use tempfile::tempdir;

// =============================================================================
// COUNTING WRAPPERS
// =============================================================================

/// Records every collection a lookup touched.
#[derive(Default)]
struct SpyIndex {
    inner: MemoryIndex,
    lookups: Mutex<Vec<String>>,
}

impl SpyIndex {
    fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl SearchIndex for SpyIndex {
    fn get_many(
        &self,
        collection: &str,
        ids: &[String],
        fields: Option<&[&str]>,
    ) -> Result<SearchHits, TdsError> {
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.push(collection.to_string());
        }
        self.inner.get_many(collection, ids, fields)
    }

    fn put(&self, collection: &str, id: &str, document: Document) -> Result<bool, TdsError> {
        self.inner.put(collection, id, document)
    }

    fn remove(&self, collection: &str, id: &str) -> Result<bool, TdsError> {
        self.inner.remove(collection, id)
    }

    fn count(&self, collection: &str) -> Result<usize, TdsError> {
        self.inner.count(collection)
    }
}

/// Counts publication batch lookups. Can reject project batch inserts.
#[derive(Default)]
struct SpyStore {
    inner: MemoryStore,
    publication_lookups: AtomicUsize,
    reject_project_batches: AtomicBool,
}

impl RelationalStore for SpyStore {
    fn insert_relation(&self, payload: &ProvenancePayload) -> Result<Relation, TdsError> {
        self.inner.insert_relation(payload)
    }

    fn get_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        self.inner.get_relation(id)
    }

    fn delete_relation(&self, id: RelationId) -> Result<Option<Relation>, TdsError> {
        self.inner.delete_relation(id)
    }

    fn count_matching_relations(&self, payload: &ProvenancePayload) -> Result<usize, TdsError> {
        self.inner.count_matching_relations(payload)
    }

    fn relation_count(&self) -> Result<usize, TdsError> {
        self.inner.relation_count()
    }

    fn insert_project(&self, name: &str, description: &str) -> Result<Project, TdsError> {
        self.inner.insert_project(name, description)
    }

    fn insert_project_with_assets(
        &self,
        name: &str,
        description: &str,
        assets: &[(ResourceType, String)],
    ) -> Result<Project, TdsError> {
        if self.reject_project_batches.load(Ordering::SeqCst) {
            return Err(TdsError::relational("disk full"));
        }
        self.inner
            .insert_project_with_assets(name, description, assets)
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<Project>, TdsError> {
        self.inner.get_project(id)
    }

    fn list_projects(&self, offset: usize, limit: usize) -> Result<Vec<Project>, TdsError> {
        self.inner.list_projects(offset, limit)
    }

    fn update_project(&self, project: &Project) -> Result<bool, TdsError> {
        self.inner.update_project(project)
    }

    fn set_project_active(&self, id: ProjectId, active: bool) -> Result<bool, TdsError> {
        self.inner.set_project_active(id, active)
    }

    fn project_count(&self) -> Result<usize, TdsError> {
        self.inner.project_count()
    }

    fn insert_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<AssetInsert, TdsError> {
        self.inner.insert_asset(project_id, resource_type, resource_id)
    }

    fn delete_asset(
        &self,
        project_id: ProjectId,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<bool, TdsError> {
        self.inner.delete_asset(project_id, resource_type, resource_id)
    }

    fn list_assets(
        &self,
        project_id: ProjectId,
        types: &[ResourceType],
    ) -> Result<Vec<ProjectAsset>, TdsError> {
        self.inner.list_assets(project_id, types)
    }

    fn insert_publication(&self, draft: &PublicationDraft) -> Result<Publication, TdsError> {
        self.inner.insert_publication(draft)
    }

    fn get_publication(&self, id: PublicationId) -> Result<Option<Publication>, TdsError> {
        self.inner.get_publication(id)
    }

    fn publications_in(&self, ids: &[PublicationId]) -> Result<Vec<Publication>, TdsError> {
        self.publication_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.publications_in(ids)
    }

    fn enqueue_mirror(&self, op: MirrorOp) -> Result<u64, TdsError> {
        self.inner.enqueue_mirror(op)
    }

    fn pending_mirror(&self, limit: usize) -> Result<Vec<(u64, MirrorOp)>, TdsError> {
        self.inner.pending_mirror(limit)
    }

    fn ack_mirror(&self, seq: u64) -> Result<bool, TdsError> {
        self.inner.ack_mirror(seq)
    }

    fn outbox_len(&self) -> Result<usize, TdsError> {
        self.inner.outbox_len()
    }
}

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

fn spied() -> (ResourceAggregator, Arc<SpyStore>, Arc<SpyIndex>) {
    let store = Arc::new(SpyStore::default());
    let index = Arc::new(SpyIndex::default());
    let aggregator = ResourceAggregator::new(store.clone(), index.clone());
    (aggregator, store, index)
}

fn ids(views: &[AssetView]) -> Vec<String> {
    views.iter().map(AssetView::resource_id).collect()
}

// =============================================================================
// ROUTING
// =============================================================================

#[test]
fn publications_never_reach_the_index() {
    let (aggregator, store, index) = spied();
    let project = store.insert_project("p", "").expect("project");
    let publication = store
        .insert_publication(&PublicationDraft {
            xdd_uri: "xdd://paper".to_string(),
            title: "Paper".to_string(),
        })
        .expect("publication");
    aggregator
        .add_asset(project.id, ResourceType::Publications, &publication.id.to_string())
        .expect("add");

    let resolved = aggregator
        .resolve_assets(project.id, &[ResourceType::Publications])
        .expect("resolve");
    assert_eq!(ids(&resolved[&ResourceType::Publications]), vec!["1".to_string()]);
    assert!(index.lookups().is_empty());
    assert_eq!(store.publication_lookups.load(Ordering::SeqCst), 1);
}

#[test]
fn indexed_types_never_query_publications() {
    let (aggregator, store, index) = spied();
    let project = store.insert_project("p", "").expect("project");
    for (resource_type, id) in [
        (ResourceType::Datasets, "ds-1"),
        (ResourceType::Models, "m-1"),
        (ResourceType::Workflows, "wf-1"),
    ] {
        aggregator
            .index_document(resource_type, id, doc(json!({"name": id})))
            .expect("index");
        aggregator
            .add_asset(project.id, resource_type, id)
            .expect("add");
    }

    let resolved = aggregator
        .resolve_assets(
            project.id,
            &[ResourceType::Datasets, ResourceType::Models, ResourceType::Workflows],
        )
        .expect("resolve");
    assert_eq!(resolved.len(), 3);
    assert_eq!(store.publication_lookups.load(Ordering::SeqCst), 0);

    let mut lookups = index.lookups();
    lookups.sort();
    assert_eq!(lookups, vec!["tds_dataset", "tds_model", "tds_workflow"]);
}

#[test]
fn types_without_references_are_not_looked_up() {
    let (aggregator, store, index) = spied();
    let project = store.insert_project("p", "").expect("project");
    let resolved = aggregator.resolve_assets(project.id, &[]).expect("resolve");

    assert_eq!(resolved.len(), ResourceType::ASSET_DEFAULTS.len());
    assert!(index.lookups().is_empty());
    assert_eq!(store.publication_lookups.load(Ordering::SeqCst), 0);
}

// =============================================================================
// SHAPING THROUGH THE DATASTORE
// =============================================================================

#[test]
fn dataset_project_resolves_in_reference_order() {
    let store = Datastore::in_memory();
    let aggregator = store.aggregator();
    for id in ["ds-b", "ds-a"] {
        aggregator
            .index_document(
                ResourceType::Datasets,
                id,
                doc(json!({"name": format!("Dataset {id}"), "file_names": ["a.csv"]})),
            )
            .expect("index");
    }

    let mut assets = BTreeMap::new();
    assets.insert(
        ResourceType::Datasets,
        vec!["ds-b".to_string(), "ds-a".to_string()],
    );
    let project = store
        .projects()
        .create(&ProjectDraft {
            name: "epi".to_string(),
            description: "covid".to_string(),
            assets,
        })
        .expect("create");

    let resolved = aggregator
        .resolve_assets(project, &[ResourceType::Datasets])
        .expect("resolve");
    let datasets = &resolved[&ResourceType::Datasets];
    assert_eq!(ids(datasets), vec!["ds-b".to_string(), "ds-a".to_string()]);
    assert!(matches!(&datasets[0], AssetView::Dataset(d) if d.name == "Dataset ds-b"));
}

#[test]
fn model_summaries_drop_unlisted_fields() {
    let store = Datastore::in_memory();
    let aggregator = store.aggregator();
    aggregator
        .index_document(
            ResourceType::Models,
            "sir",
            doc(json!({
                "name": "SIR",
                "framework": "petrinet",
                "model": {"states": ["S", "I", "R"]},
            })),
        )
        .expect("index");
    let project = store
        .projects()
        .create(&ProjectDraft {
            name: "models".to_string(),
            ..ProjectDraft::default()
        })
        .expect("create");
    aggregator
        .add_asset(project, ResourceType::Models, "sir")
        .expect("add");

    let resolved = aggregator
        .resolve_assets(project, &[ResourceType::Models])
        .expect("resolve");
    let rendered = serde_json::to_value(&resolved[&ResourceType::Models]).expect("serialize");
    assert_eq!(rendered[0]["framework"], "petrinet");
    assert!(rendered[0].get("model").is_none());
}

#[test]
fn malformed_configuration_fails_whole_call() {
    let store = Datastore::in_memory();
    let aggregator = store.aggregator();
    aggregator
        .index_document(
            ResourceType::ModelConfigurations,
            "cfg",
            doc(json!({"name": "no model id"})),
        )
        .expect("index");
    aggregator
        .index_document(ResourceType::Datasets, "ds", doc(json!({"name": "ok"})))
        .expect("index");
    let project = store
        .projects()
        .create(&ProjectDraft {
            name: "broken".to_string(),
            ..ProjectDraft::default()
        })
        .expect("create");
    aggregator
        .add_asset(project, ResourceType::ModelConfigurations, "cfg")
        .expect("add");
    aggregator
        .add_asset(project, ResourceType::Datasets, "ds")
        .expect("add");

    assert!(matches!(
        aggregator.resolve_assets(project, &[]),
        Err(TdsError::MalformedDocument { .. })
    ));
    assert!(aggregator
        .resolve_assets(project, &[ResourceType::Datasets])
        .is_ok());
}

// =============================================================================
// REDB BACKEND
// =============================================================================

#[test]
fn redb_backend_resolves_after_reopen() {
    let temp = tempdir().expect("temp dir");
    let config = StoreConfig {
        data_dir: temp.path().to_path_buf(),
        ..StoreConfig::default()
    };

    let project = {
        let store = Datastore::open(config.clone()).expect("open");
        let publication = store
            .create_publication(&PublicationDraft {
                xdd_uri: "xdd://42".to_string(),
                title: "Answer".to_string(),
            })
            .expect("publication");
        store
            .aggregator()
            .index_document(ResourceType::Artifacts, "art", doc(json!({"name": "notebook"})))
            .expect("index");

        let mut assets = BTreeMap::new();
        assets.insert(ResourceType::Artifacts, vec!["art".to_string()]);
        assets.insert(ResourceType::Publications, vec![publication.id.to_string()]);
        store
            .projects()
            .create(&ProjectDraft {
                name: "persisted".to_string(),
                description: String::new(),
                assets,
            })
            .expect("create")
    };

    let store = Datastore::open(config).expect("reopen");
    let resolved = store
        .aggregator()
        .resolve_assets(project, &[ResourceType::Artifacts, ResourceType::Publications])
        .expect("resolve");
    assert_eq!(ids(&resolved[&ResourceType::Artifacts]), vec!["art".to_string()]);
    assert_eq!(ids(&resolved[&ResourceType::Publications]), vec!["1".to_string()]);
}

// =============================================================================
// LARGE PROJECTS
// =============================================================================

#[test]
fn indexed_references_beyond_lookup_cap_resolve_in_batches() {
    let (aggregator, store, index) = spied();
    let project = store.insert_project("p", "").expect("project");
    let total = MAX_LOOKUP_IDS + 1;
    for n in 0..total {
        let id = format!("ds-{n}");
        aggregator
            .index_document(ResourceType::Datasets, &id, doc(json!({"name": id})))
            .expect("index");
        store
            .insert_asset(project.id, ResourceType::Datasets, &id)
            .expect("asset");
    }

    let resolved = aggregator
        .resolve_assets(project.id, &[ResourceType::Datasets])
        .expect("resolve");
    let views = &resolved[&ResourceType::Datasets];
    assert_eq!(views.len(), total);
    assert_eq!(views[0].resource_id(), "ds-0");
    assert_eq!(views[total - 1].resource_id(), format!("ds-{}", total - 1));
    assert_eq!(index.lookups().len(), 2);
}

#[test]
fn publication_references_beyond_lookup_cap_resolve_in_batches() {
    let (aggregator, store, _index) = spied();
    let project = store.insert_project("p", "").expect("project");
    let total = MAX_LOOKUP_IDS + 1;
    for n in 0..total {
        let publication = store
            .insert_publication(&PublicationDraft {
                xdd_uri: format!("xdd://{n}"),
                title: String::new(),
            })
            .expect("publication");
        store
            .insert_asset(project.id, ResourceType::Publications, &publication.id.to_string())
            .expect("asset");
    }

    let resolved = aggregator
        .resolve_assets(project.id, &[ResourceType::Publications])
        .expect("resolve");
    assert_eq!(resolved[&ResourceType::Publications].len(), total);
    assert_eq!(store.publication_lookups.load(Ordering::SeqCst), 2);
}

// =============================================================================
// PROJECT CREATION
// =============================================================================

#[test]
fn failed_project_batch_leaves_no_rows() {
    let store = Arc::new(SpyStore::default());
    let datastore = Datastore::from_parts(
        StoreConfig::memory(),
        store.clone(),
        None,
        Arc::new(MemoryIndex::new()),
    );
    for id in ["ds-1", "ds-2"] {
        datastore
            .aggregator()
            .index_document(ResourceType::Datasets, id, doc(json!({"name": id})))
            .expect("index");
    }
    store.reject_project_batches.store(true, Ordering::SeqCst);

    let draft = ProjectDraft {
        name: "p".to_string(),
        description: String::new(),
        assets: BTreeMap::from([(
            ResourceType::Datasets,
            vec!["ds-1".to_string(), "ds-2".to_string()],
        )]),
    };
    assert!(matches!(
        datastore.projects().create(&draft),
        Err(TdsError::StoreUnavailable { store: "relational", .. })
    ));
    assert_eq!(store.project_count().expect("count"), 0);
    assert!(store.list_assets(ProjectId(1), &[]).expect("assets").is_empty());
}
