//! # tds-core
//!
//! The data-store core for TDS.
//!
//! This crate keeps provenance relations consistent across an authoritative
//! relational store and a graph mirror, and resolves project asset
//! references across the relational store and a search index.
//!
//! ## Layout
//!
//! - `types` / `primitives`: records, tags, errors and fixed limits
//! - `relational` / `graph` / `search`: the three store handles, each with
//!   an in-memory implementation
//! - `storage`: redb-backed implementations of the three handles
//! - `provenance`: the dual-write coordinator and its mirror outbox
//! - `assets` / `shaping`: the routing table, aggregator and typed views
//! - `projects`: project bookkeeping
//! - `datastore`: the composition root
//!
//! ## Architectural Constraints
//!
//! - No async and no network dependencies (pure Rust)
//! - The relational store is the only authoritative record
//! - Store handles are passed in explicitly; nothing is global

// =============================================================================
// MODULES
// =============================================================================

pub mod assets;
pub mod config;
pub mod datastore;
pub mod graph;
pub mod primitives;
pub mod projects;
pub mod provenance;
pub mod relational;
pub mod search;
pub mod shaping;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    AssetId, AssetInsert, EdgeKey, MirrorOp, NodeKey, Project, ProjectAsset, ProjectDraft,
    ProjectId, ProvenancePayload, Publication, PublicationDraft, PublicationId, Relation,
    RelationDraft, RelationId, RelationType, ResourceType, TdsError, UserId, validate_resource_id,
};

// =============================================================================
// RE-EXPORTS: Stores
// =============================================================================

pub use graph::{GraphMirror, MemoryGraph, UnavailableGraph};
pub use relational::{MemoryStore, RelationalStore};
pub use search::{Document, Hit, MemoryIndex, SearchHits, SearchIndex};
pub use storage::{RedbGraph, RedbIndex, RedbStore};

// =============================================================================
// RE-EXPORTS: Coordinator, Aggregator, Projects
// =============================================================================

pub use assets::{AssetKey, AssetMap, ResourceAggregator, Route, route};
pub use config::{StorageBackend, StoreConfig};
pub use datastore::{Datastore, DatastoreStats, GraphStats};
pub use projects::{ProjectRecord, ProjectRegistry};
pub use provenance::{ProvenanceCoordinator, ReplayReport};
pub use shaping::AssetView;
