//! # Search Index
//!
//! Document store for the search-indexed resource types. Documents are JSON
//! objects grouped in named collections (`{prefix}{label}`) and fetched by id.

use crate::TdsError;
use crate::primitives::MAX_LOOKUP_IDS;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A search document: one JSON object.
pub type Document = Map<String, Value>;

/// One document returned by a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Document,
}

/// Result of a multi-id lookup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchHits {
    /// Number of requested ids that matched a document.
    pub total: usize,
    /// Matched documents in requested-id order.
    pub hits: Vec<Hit>,
}

// =============================================================================
// SEARCH INDEX TRAIT
// =============================================================================

pub trait SearchIndex: Send + Sync {
    /// Fetch documents by id. With `fields`, each source keeps only those
    /// top-level keys. Unknown ids and repeated ids are skipped.
    fn get_many(
        &self,
        collection: &str,
        ids: &[String],
        fields: Option<&[&str]>,
    ) -> Result<SearchHits, TdsError>;

    /// Insert or replace a document. Returns `true` if it was new.
    fn put(&self, collection: &str, id: &str, document: Document) -> Result<bool, TdsError>;

    fn remove(&self, collection: &str, id: &str) -> Result<bool, TdsError>;

    fn count(&self, collection: &str) -> Result<usize, TdsError>;

    fn contains(&self, collection: &str, id: &str) -> Result<bool, TdsError> {
        let hits = self.get_many(collection, &[id.to_string()], Some(&[]))?;
        Ok(hits.total > 0)
    }
}

/// Keep only the listed top-level fields. `None` keeps everything.
#[must_use]
pub fn project_fields(document: &Document, fields: Option<&[&str]>) -> Document {
    match fields {
        None => document.clone(),
        Some(keep) => document
            .iter()
            .filter(|(k, _)| keep.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

pub(crate) fn check_lookup_size(ids: &[String]) -> Result<(), TdsError> {
    if ids.len() > MAX_LOOKUP_IDS {
        return Err(TdsError::InvalidAsset(format!(
            "lookup of {} ids exceeds maximum {}",
            ids.len(),
            MAX_LOOKUP_IDS
        )));
    }
    Ok(())
}

// =============================================================================
// IN-MEMORY INDEX
// =============================================================================

/// A volatile search index.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<String, BTreeMap<String, Document>>>, TdsError> {
        self.collections
            .lock()
            .map_err(|_| TdsError::search("index lock poisoned"))
    }
}

impl SearchIndex for MemoryIndex {
    fn get_many(
        &self,
        collection: &str,
        ids: &[String],
        fields: Option<&[&str]>,
    ) -> Result<SearchHits, TdsError> {
        check_lookup_size(ids)?;
        let collections = self.collections()?;
        let Some(docs) = collections.get(collection) else {
            return Ok(SearchHits::default());
        };

        let mut seen = BTreeSet::new();
        let hits: Vec<Hit> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| {
                docs.get(id).map(|doc| Hit {
                    id: id.clone(),
                    source: project_fields(doc, fields),
                })
            })
            .collect();

        Ok(SearchHits {
            total: hits.len(),
            hits,
        })
    }

    fn put(&self, collection: &str, id: &str, document: Document) -> Result<bool, TdsError> {
        Ok(self
            .collections()?
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document)
            .is_none())
    }

    fn remove(&self, collection: &str, id: &str) -> Result<bool, TdsError> {
        Ok(self
            .collections()?
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(id).is_some()))
    }

    fn count(&self, collection: &str) -> Result<usize, TdsError> {
        Ok(self
            .collections()?
            .get(collection)
            .map_or(0, BTreeMap::len))
    }
}
