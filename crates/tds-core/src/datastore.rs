//! # Datastore
//!
//! Composition root: builds the three store handles from a [`StoreConfig`]
//! and wires them into the coordinator, aggregator and project registry.
//! Nothing here is global; the owning application holds the `Datastore`.

use crate::assets::ResourceAggregator;
use crate::config::{StorageBackend, StoreConfig};
use crate::graph::{GraphMirror, MemoryGraph, UnavailableGraph};
use crate::projects::ProjectRegistry;
use crate::provenance::ProvenanceCoordinator;
use crate::relational::{MemoryStore, RelationalStore};
use crate::search::{MemoryIndex, SearchIndex};
use crate::storage::{GRAPH_FILE, INDEX_FILE, RELATIONAL_FILE, RedbGraph, RedbIndex, RedbStore};
use crate::{Publication, PublicationDraft, PublicationId, TdsError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Graph mirror size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Counts reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreStats {
    pub backend: StorageBackend,
    pub relations: usize,
    pub projects: usize,
    pub mirror_enabled: bool,
    /// `None` when mirroring is disabled or the graph store is unreachable.
    pub graph: Option<GraphStats>,
    /// Why the graph store could not be read, when mirroring is enabled.
    pub graph_error: Option<String>,
    pub pending_mirror_ops: usize,
}

pub struct Datastore {
    config: StoreConfig,
    relational: Arc<dyn RelationalStore>,
    graph: Option<Arc<dyn GraphMirror>>,
    provenance: ProvenanceCoordinator,
    aggregator: Arc<ResourceAggregator>,
    projects: ProjectRegistry,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("config", &self.config)
            .field("mirror_enabled", &self.graph.is_some())
            .finish_non_exhaustive()
    }
}

impl Datastore {
    /// Open the stores named by `config`.
    ///
    /// Only relational and index failures are fatal. A graph store that
    /// cannot be opened is replaced by an [`UnavailableGraph`], so relational
    /// operations keep working and mirror writes are queued.
    pub fn open(config: StoreConfig) -> Result<Self, TdsError> {
        config.validate()?;

        let relational: Arc<dyn RelationalStore>;
        let graph: Option<Arc<dyn GraphMirror>>;
        let index: Arc<dyn SearchIndex>;

        match config.backend {
            StorageBackend::Memory => {
                relational = Arc::new(MemoryStore::new());
                graph = if config.graph_mirror {
                    Some(Arc::new(MemoryGraph::new()) as Arc<dyn GraphMirror>)
                } else {
                    None
                };
                index = Arc::new(MemoryIndex::new());
            }
            StorageBackend::Redb => {
                let dir = &config.data_dir;
                std::fs::create_dir_all(dir).map_err(|e| {
                    TdsError::InvalidConfig(format!("cannot create {}: {e}", dir.display()))
                })?;
                relational = Arc::new(RedbStore::open(dir.join(RELATIONAL_FILE))?);
                graph = if config.graph_mirror {
                    Some(match RedbGraph::open(dir.join(GRAPH_FILE)) {
                        Ok(g) => Arc::new(g) as Arc<dyn GraphMirror>,
                        Err(e) => {
                            warn!(error = %e, "graph store unavailable; mirror writes will be queued");
                            Arc::new(UnavailableGraph::new(e)) as Arc<dyn GraphMirror>
                        }
                    })
                } else {
                    None
                };
                index = Arc::new(RedbIndex::open(dir.join(INDEX_FILE))?);
            }
        }

        info!(
            backend = %config.backend,
            data_dir = %config.data_dir.display(),
            graph_mirror = graph.is_some(),
            mirror_outbox = config.mirror_outbox,
            "datastore opened"
        );
        Ok(Self::from_parts(config, relational, graph, index))
    }

    /// A volatile datastore with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_parts(
            StoreConfig::memory(),
            Arc::new(MemoryStore::new()),
            Some(Arc::new(MemoryGraph::new()) as Arc<dyn GraphMirror>),
            Arc::new(MemoryIndex::new()),
        )
    }

    /// Wire caller-supplied store handles.
    pub fn from_parts(
        config: StoreConfig,
        relational: Arc<dyn RelationalStore>,
        graph: Option<Arc<dyn GraphMirror>>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        let provenance = ProvenanceCoordinator::new(relational.clone(), graph.clone())
            .with_outbox(config.mirror_outbox);
        let aggregator = Arc::new(
            ResourceAggregator::new(relational.clone(), index)
                .with_index_prefix(config.index_prefix.clone()),
        );
        let projects = ProjectRegistry::new(relational.clone(), aggregator.clone());

        Self {
            config,
            relational,
            graph,
            provenance,
            aggregator,
            projects,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn provenance(&self) -> &ProvenanceCoordinator {
        &self.provenance
    }

    pub fn aggregator(&self) -> &ResourceAggregator {
        &self.aggregator
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn create_publication(&self, draft: &PublicationDraft) -> Result<Publication, TdsError> {
        if draft.xdd_uri.trim().is_empty() {
            return Err(TdsError::InvalidAsset("xdd_uri must not be empty".to_string()));
        }
        let row = self.relational.insert_publication(draft)?;
        info!(publication = %row.id, "publication created");
        Ok(row)
    }

    pub fn get_publication(&self, id: PublicationId) -> Result<Option<Publication>, TdsError> {
        self.relational.get_publication(id)
    }

    /// Store counts. A failing graph store is reported, not propagated.
    pub fn stats(&self) -> Result<DatastoreStats, TdsError> {
        let (graph, graph_error) = match &self.graph {
            Some(g) => match graph_stats(g.as_ref()) {
                Ok(stats) => (Some(stats), None),
                Err(e) => (None, Some(e.to_string())),
            },
            None => (None, None),
        };
        Ok(DatastoreStats {
            backend: self.config.backend,
            relations: self.relational.relation_count()?,
            projects: self.relational.project_count()?,
            mirror_enabled: self.graph.is_some(),
            graph,
            graph_error,
            pending_mirror_ops: self.relational.outbox_len()?,
        })
    }
}

fn graph_stats(graph: &dyn GraphMirror) -> Result<GraphStats, TdsError> {
    Ok(GraphStats {
        nodes: graph.node_count()?,
        edges: graph.edge_count()?,
    })
}
