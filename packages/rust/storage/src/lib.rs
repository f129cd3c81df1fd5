//! Storage interfaces for raw files and vector indexes, plus in-memory backends.
//!
//! Executors only ever see the [`RawFileStorage`] and [`IndexStorage`] traits;
//! handles are injected at construction, there is no global connection state.
//!
//! The in-memory backends ([`MemoryRawFileStorage`], [`MemoryIndexStorage`])
//! back the CLI and the test suites. Durable backends implement the same traits.

mod index;
mod raw_files;

use chrono::{DateTime, Utc};
use kbforge_shared::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use index::MemoryIndexStorage;
pub use raw_files::MemoryRawFileStorage;

// ---------------------------------------------------------------------------
// Raw files
// ---------------------------------------------------------------------------

/// Where a raw file is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RawFileStatus {
    /// Stored by ingestion, not yet part of an index build.
    #[default]
    Ingested,
    /// Processed into the current collection.
    Indexed,
    /// Last index build failed on this file.
    Failed,
}

/// Metadata for one ingested source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFile {
    /// Unique file identifier (UUID v7).
    pub id: String,
    /// Owning knowledge base.
    pub knowledge_base_id: String,
    /// Stable source location (path, URL, post id).
    pub source_uri: String,
    /// Display name.
    pub name: String,
    /// SHA-256 hash of the content.
    pub content_hash: String,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub status: RawFileStatus,
    /// Bumped each time ingestion stores new content for the same source.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Connector-provided metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RawFile {
    /// A fresh version-1 file with a generated id.
    pub fn new(
        knowledge_base_id: impl Into<String>,
        source_uri: impl Into<String>,
        name: impl Into<String>,
        content_hash: impl Into<String>,
        size_bytes: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            knowledge_base_id: knowledge_base_id.into(),
            source_uri: source_uri.into(),
            name: name.into(),
            content_hash: content_hash.into(),
            size_bytes,
            mime_type: None,
            status: RawFileStatus::Ingested,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Persistence for ingested documents.
pub trait RawFileStorage: Send + Sync {
    /// Insert or replace a file record together with its content.
    fn save(&self, file: RawFile, content: Vec<u8>) -> Result<RawFile>;

    fn get(&self, file_id: &str) -> Result<Option<RawFile>>;

    fn get_content(&self, file_id: &str) -> Result<Option<Vec<u8>>>;

    /// All files of a knowledge base, oldest first.
    fn list(&self, knowledge_base_id: &str) -> Result<Vec<RawFile>>;

    fn exists_by_hash(&self, knowledge_base_id: &str, content_hash: &str) -> Result<bool>;

    fn find_by_source(&self, knowledge_base_id: &str, source_uri: &str) -> Result<Option<RawFile>>;

    fn update_status(&self, file_id: &str, status: RawFileStatus) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Vector indexes
// ---------------------------------------------------------------------------

/// One vector plus payload to be written to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub written: usize,
    pub failed: usize,
    /// Per-record failure reasons (record id, message).
    #[serde(default)]
    pub errors: Vec<(String, String)>,
}

/// Summary of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub record_count: usize,
    /// Vector dimension, fixed by the first write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// Vector database operations used by indexing (write) and publishing (aliases).
pub trait IndexStorage: Send + Sync {
    fn collection_exists(&self, name: &str) -> Result<bool>;

    fn create_collection(&self, name: &str) -> Result<()>;

    fn write(&self, collection: &str, records: &[IndexRecord]) -> Result<WriteResult>;

    /// Collection an alias currently points at.
    fn get_alias_target(&self, alias: &str) -> Result<Option<String>>;

    /// Point `alias` at `collection`, creating the alias if needed.
    fn update_alias(&self, alias: &str, collection: &str) -> Result<()>;

    /// Atomically repoint `alias` from `from` to `to`. Fails if `alias` no longer targets `from`.
    fn switch_alias(&self, alias: &str, from: &str, to: &str) -> Result<()>;

    fn get_collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;
}
