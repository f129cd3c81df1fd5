//! Source connector trait and the string-keyed connector registry.
//!
//! Connectors are created fresh for each ingestion task from a registered
//! factory, configured with the task's `connector_config`, and then drained.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kbforge_shared::{KbForgeError, Result};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One document fetched from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Stable location of the document within its source.
    pub source_uri: String,
    pub name: String,
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SourceRecord {
    pub fn new(source_uri: impl Into<String>, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            source_uri: source_uri.into(),
            name: name.into(),
            content,
            mime_type: None,
            modified_at: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Outcome of a connection probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub ok: bool,
    pub message: String,
}

impl ConnectionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Lazily produced source records. An `Err` item is a per-record failure.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<SourceRecord>> + 'a>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A document source (filesystem, sitemap, forum API, ...).
pub trait Connector: Send {
    /// Registry key, e.g. `filesystem`.
    fn connector_type(&self) -> &str;

    /// Apply connector-specific settings. Called once before any fetch.
    fn configure(&mut self, config: &serde_json::Value) -> Result<()>;

    /// Check that the source is reachable with the current configuration.
    fn validate_connection(&self) -> ConnectionResult;

    fn fetch(&self) -> Result<RecordStream<'_>>;

    /// Records changed after `since`. Only meaningful when `supports_incremental`.
    fn fetch_incremental(&self, since: DateTime<Utc>) -> Result<RecordStream<'_>>;

    fn supports_incremental(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type ConnectorFactory = Box<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Maps connector type keys to factories. Populated once at startup.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: BTreeMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `connector_type`. Registering a key twice is an error.
    pub fn register<F>(&mut self, connector_type: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Connector> + Send + Sync + 'static,
    {
        if self.factories.contains_key(connector_type) {
            return Err(KbForgeError::duplicate("connector", connector_type));
        }
        self.factories
            .insert(connector_type.to_string(), Box::new(factory));
        tracing::debug!(connector_type, "registered connector");
        Ok(())
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.contains_key(connector_type)
    }

    /// A fresh, unconfigured connector instance.
    pub fn create(&self, connector_type: &str) -> Result<Box<dyn Connector>> {
        self.factories
            .get(connector_type)
            .map(|factory| factory())
            .ok_or_else(|| KbForgeError::not_found("connector", connector_type))
    }

    pub fn connector_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connector_types", &self.connector_types())
            .finish()
    }
}
