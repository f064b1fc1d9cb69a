//! # Storage
//!
//! redb-backed implementations of the three store handles. Each lives in
//! its own database file so the stores fail independently:
//!
//! | File | Type | Trait |
//! |------|------|-------|
//! | `relational.redb` | [`RedbStore`] | `RelationalStore` |
//! | `graph.redb` | [`RedbGraph`] | `GraphMirror` |
//! | `index.redb` | [`RedbIndex`] | `SearchIndex` |
//!
//! Rows are postcard-encoded; search documents are stored as JSON.

mod redb_graph;
mod redb_index;
mod redb_store;

pub use redb_graph::RedbGraph;
pub use redb_index::RedbIndex;
pub use redb_store::RedbStore;

use crate::TdsError;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const RELATIONAL_FILE: &str = "relational.redb";
pub const GRAPH_FILE: &str = "graph.redb";
pub const INDEX_FILE: &str = "index.redb";

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TdsError> {
    postcard::to_allocvec(value).map_err(|e| TdsError::SerializationError(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TdsError> {
    postcard::from_bytes(bytes).map_err(|e| TdsError::SerializationError(e.to_string()))
}
