//! In-memory raw file store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use kbforge_shared::{KbForgeError, Result};

use crate::{RawFile, RawFileStatus, RawFileStorage};

#[derive(Default)]
struct Inner {
    files: HashMap<String, RawFile>,
    contents: HashMap<String, Vec<u8>>,
}

/// Raw file store kept in process memory. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryRawFileStorage {
    inner: Mutex<Inner>,
}

impl MemoryRawFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored files across all knowledge bases.
    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RawFileStorage for MemoryRawFileStorage {
    fn save(&self, mut file: RawFile, content: Vec<u8>) -> Result<RawFile> {
        if file.knowledge_base_id.is_empty() {
            return Err(KbForgeError::Storage(format!(
                "file {} has no knowledge base",
                file.id
            )));
        }
        file.size_bytes = content.len();
        file.updated_at = Utc::now();

        let mut inner = self.lock();
        inner.contents.insert(file.id.clone(), content);
        inner.files.insert(file.id.clone(), file.clone());
        tracing::trace!(file_id = %file.id, version = file.version, "raw file saved");
        Ok(file)
    }

    fn get(&self, file_id: &str) -> Result<Option<RawFile>> {
        Ok(self.lock().files.get(file_id).cloned())
    }

    fn get_content(&self, file_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().contents.get(file_id).cloned())
    }

    fn list(&self, knowledge_base_id: &str) -> Result<Vec<RawFile>> {
        let mut files: Vec<RawFile> = self
            .lock()
            .files
            .values()
            .filter(|f| f.knowledge_base_id == knowledge_base_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(files)
    }

    fn exists_by_hash(&self, knowledge_base_id: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .lock()
            .files
            .values()
            .any(|f| f.knowledge_base_id == knowledge_base_id && f.content_hash == content_hash))
    }

    fn find_by_source(&self, knowledge_base_id: &str, source_uri: &str) -> Result<Option<RawFile>> {
        Ok(self
            .lock()
            .files
            .values()
            .find(|f| f.knowledge_base_id == knowledge_base_id && f.source_uri == source_uri)
            .cloned())
    }

    fn update_status(&self, file_id: &str, status: RawFileStatus) -> Result<()> {
        let mut inner = self.lock();
        let file = inner
            .files
            .get_mut(file_id)
            .ok_or_else(|| KbForgeError::not_found("raw file", file_id))?;
        file.status = status;
        file.updated_at = Utc::now();
        Ok(())
    }
}
