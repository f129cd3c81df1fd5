//! In-memory vector collections with alias support.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use kbforge_shared::{KbForgeError, Result};

use crate::{CollectionInfo, IndexRecord, IndexStorage, WriteResult};

struct Collection {
    records: HashMap<String, IndexRecord>,
    dimension: Option<usize>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    aliases: HashMap<String, String>,
}

/// Index store kept in process memory.
///
/// Collections and aliases share one lock, so `switch_alias` is atomic with
/// respect to every other operation on the store.
#[derive(Default)]
pub struct MemoryIndexStorage {
    inner: Mutex<Inner>,
}

impl MemoryIndexStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All records of a collection, ordered by (file id, chunk index).
    pub fn records(&self, collection: &str) -> Vec<IndexRecord> {
        let inner = self.lock();
        let mut records: Vec<IndexRecord> = inner
            .collections
            .get(collection)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            a.file_id
                .cmp(&b.file_id)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        records
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().collections.keys().cloned().collect();
        names.sort();
        names
    }
}

impl IndexStorage for MemoryIndexStorage {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().collections.contains_key(name))
    }

    fn create_collection(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.collections.contains_key(name) {
            return Err(KbForgeError::duplicate("collection", name));
        }
        inner.collections.insert(
            name.to_string(),
            Collection {
                records: HashMap::new(),
                dimension: None,
                created_at: Utc::now(),
            },
        );
        tracing::debug!(collection = name, "collection created");
        Ok(())
    }

    fn write(&self, collection: &str, records: &[IndexRecord]) -> Result<WriteResult> {
        let mut inner = self.lock();
        let target = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| KbForgeError::not_found("collection", collection))?;

        let mut result = WriteResult::default();
        for record in records {
            if record.vector.is_empty() {
                result.failed += 1;
                result.errors.push((record.id.clone(), "empty vector".into()));
                continue;
            }
            let dimension = *target.dimension.get_or_insert(record.vector.len());
            if record.vector.len() != dimension {
                result.failed += 1;
                result.errors.push((
                    record.id.clone(),
                    format!(
                        "dimension mismatch: expected {dimension}, got {}",
                        record.vector.len()
                    ),
                ));
                continue;
            }
            target.records.insert(record.id.clone(), record.clone());
            result.written += 1;
        }
        Ok(result)
    }

    fn get_alias_target(&self, alias: &str) -> Result<Option<String>> {
        Ok(self.lock().aliases.get(alias).cloned())
    }

    fn update_alias(&self, alias: &str, collection: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.collections.contains_key(collection) {
            return Err(KbForgeError::not_found("collection", collection));
        }
        inner.aliases.insert(alias.to_string(), collection.to_string());
        Ok(())
    }

    fn switch_alias(&self, alias: &str, from: &str, to: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.collections.contains_key(to) {
            return Err(KbForgeError::not_found("collection", to));
        }
        match inner.aliases.get(alias) {
            Some(current) if current == from => {}
            Some(current) => {
                return Err(KbForgeError::Storage(format!(
                    "alias '{alias}' points at '{current}', expected '{from}'"
                )));
            }
            None => return Err(KbForgeError::not_found("alias", alias)),
        }
        inner.aliases.insert(alias.to_string(), to.to_string());
        Ok(())
    }

    fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.lock().collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            record_count: c.records.len(),
            dimension: c.dimension,
            created_at: c.created_at,
        }))
    }
}
