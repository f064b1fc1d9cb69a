//! # redb-backed Search Index
//!
//! Stores JSON documents keyed by `(collection, id)`. A collection is a
//! contiguous key range, so counting one is a bounded scan.

use crate::TdsError;
use crate::search::{Document, Hit, SearchHits, SearchIndex, check_lookup_size, project_fields};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeSet;
use std::path::Path;

/// Documents: (collection, id) -> JSON bytes
const DOCUMENTS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("documents");

/// A disk-backed search index using redb.
pub struct RedbIndex {
    db: Database,
}

impl std::fmt::Debug for RedbIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbIndex").finish_non_exhaustive()
    }
}

impl RedbIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TdsError> {
        let db = Database::create(path.as_ref()).map_err(TdsError::search)?;
        {
            let write_txn = db.begin_write().map_err(TdsError::search)?;
            let _ = write_txn.open_table(DOCUMENTS).map_err(TdsError::search)?;
            write_txn.commit().map_err(TdsError::search)?;
        }
        Ok(Self { db })
    }
}

fn parse_document(collection: &str, id: &str, bytes: &[u8]) -> Result<Document, TdsError> {
    serde_json::from_slice(bytes).map_err(|e| TdsError::MalformedDocument {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl SearchIndex for RedbIndex {
    fn get_many(
        &self,
        collection: &str,
        ids: &[String],
        fields: Option<&[&str]>,
    ) -> Result<SearchHits, TdsError> {
        check_lookup_size(ids)?;
        let read_txn = self.db.begin_read().map_err(TdsError::search)?;
        let documents = read_txn.open_table(DOCUMENTS).map_err(TdsError::search)?;

        let mut seen = BTreeSet::new();
        let mut hits = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(raw) = documents
                .get((collection, id.as_str()))
                .map_err(TdsError::search)?
            else {
                continue;
            };
            let document = parse_document(collection, id, raw.value())?;
            hits.push(Hit {
                id: id.clone(),
                source: project_fields(&document, fields),
            });
        }

        Ok(SearchHits {
            total: hits.len(),
            hits,
        })
    }

    fn put(&self, collection: &str, id: &str, document: Document) -> Result<bool, TdsError> {
        let bytes =
            serde_json::to_vec(&document).map_err(|e| TdsError::SerializationError(e.to_string()))?;
        let write_txn = self.db.begin_write().map_err(TdsError::search)?;
        let created = {
            let mut documents = write_txn.open_table(DOCUMENTS).map_err(TdsError::search)?;
            documents
                .insert((collection, id), bytes.as_slice())
                .map_err(TdsError::search)?
                .is_none()
        };
        write_txn.commit().map_err(TdsError::search)?;
        Ok(created)
    }

    fn remove(&self, collection: &str, id: &str) -> Result<bool, TdsError> {
        let write_txn = self.db.begin_write().map_err(TdsError::search)?;
        let removed = {
            let mut documents = write_txn.open_table(DOCUMENTS).map_err(TdsError::search)?;
            documents
                .remove((collection, id))
                .map_err(TdsError::search)?
                .is_some()
        };
        write_txn.commit().map_err(TdsError::search)?;
        Ok(removed)
    }

    fn count(&self, collection: &str) -> Result<usize, TdsError> {
        let read_txn = self.db.begin_read().map_err(TdsError::search)?;
        let documents = read_txn.open_table(DOCUMENTS).map_err(TdsError::search)?;

        let mut count = 0usize;
        for entry in documents.range((collection, "")..).map_err(TdsError::search)? {
            let (key, _) = entry.map_err(TdsError::search)?;
            if key.value().0 != collection {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}
