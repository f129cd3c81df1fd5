//! Core task model: identities, lifecycle states, and typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Task identifier. Caller-supplied or a generated UUID v7 (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// TaskType / TaskStatus
// ---------------------------------------------------------------------------

/// Discriminates which executor handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Ingestion,
    Indexing,
    Publishing,
}

impl TaskType {
    /// All task types in their default probe order.
    pub const ALL: [TaskType; 3] = [Self::Ingestion, Self::Indexing, Self::Publishing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "INGESTION",
            Self::Indexing => "INDEXING",
            Self::Publishing => "PUBLISHING",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task. The queue's status map is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task can no longer change state (barring a retry of FAILED,
    /// which the queue decides before the status is ever set).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload enums
// ---------------------------------------------------------------------------

/// Whether ingestion fetches everything or only records changed since a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionMode {
    #[default]
    Full,
    Incremental,
}

/// What to do when a source record maps to an existing file with new content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupStrategy {
    #[default]
    Skip,
    AllowUpdate,
}

/// Whether an index build reprocesses every file or only files not yet indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildType {
    #[default]
    Full,
    Incremental,
}

/// Alias update strategy for publishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStrategy {
    #[default]
    BlueGreen,
    Replace,
}

impl std::fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlueGreen => f.write_str("BLUE_GREEN"),
            Self::Replace => f.write_str("REPLACE"),
        }
    }
}

/// One configured pipeline step, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Registry key of the step implementation (e.g. `markdown`, `fixed_size`).
    pub step_type: String,
    /// Disabled steps are kept in the config but not run.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Step-specific settings, passed verbatim to `configure`.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl StepConfig {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            enabled: true,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Source configuration for an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionPayload {
    /// Registry key of the connector (e.g. `filesystem`).
    pub connector_type: String,
    /// Connector-specific settings.
    #[serde(default)]
    pub connector_config: serde_json::Value,
    #[serde(default)]
    pub mode: IngestionMode,
    /// Required for incremental mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dedup_strategy: DedupStrategy,
}

/// Pipeline configuration for an index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingPayload {
    /// Ordered step configs.
    pub pipeline_config: Vec<StepConfig>,
    #[serde(default)]
    pub build_type: BuildType,
    /// Restrict the build to these raw files; all files of the KB otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<String>>,
    /// Overrides the derived collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

/// Target of a publish operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishingPayload {
    pub target_environment_id: String,
    pub alias_name: String,
    #[serde(default)]
    pub strategy: PublishStrategy,
    /// Overrides the derived collection name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

/// Type-specific task payload. The variant determines the task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPayload {
    Ingestion(IngestionPayload),
    Indexing(IndexingPayload),
    Publishing(PublishingPayload),
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Ingestion(_) => TaskType::Ingestion,
            Self::Indexing(_) => TaskType::Indexing,
            Self::Publishing(_) => TaskType::Publishing,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of requested work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub knowledge_base_id: String,
    pub knowledge_base_version_id: String,
    /// Higher is served first.
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Set when dequeued; cleared again when the task is requeued for retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub payload: TaskPayload,
}

impl Task {
    /// Create a task with a generated id, priority 0 and no retries.
    pub fn new(
        knowledge_base_id: impl Into<String>,
        knowledge_base_version_id: impl Into<String>,
        payload: TaskPayload,
    ) -> Self {
        Self {
            id: TaskId::new(),
            knowledge_base_id: knowledge_base_id.into(),
            knowledge_base_version_id: knowledge_base_version_id.into(),
            priority: 0,
            retry_count: 0,
            max_retries: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            payload,
        }
    }

    pub fn ingestion(
        knowledge_base_id: impl Into<String>,
        knowledge_base_version_id: impl Into<String>,
        payload: IngestionPayload,
    ) -> Self {
        Self::new(
            knowledge_base_id,
            knowledge_base_version_id,
            TaskPayload::Ingestion(payload),
        )
    }

    pub fn indexing(
        knowledge_base_id: impl Into<String>,
        knowledge_base_version_id: impl Into<String>,
        payload: IndexingPayload,
    ) -> Self {
        Self::new(
            knowledge_base_id,
            knowledge_base_version_id,
            TaskPayload::Indexing(payload),
        )
    }

    pub fn publishing(
        knowledge_base_id: impl Into<String>,
        knowledge_base_version_id: impl Into<String>,
        payload: PublishingPayload,
    ) -> Self {
        Self::new(
            knowledge_base_id,
            knowledge_base_version_id,
            TaskPayload::Publishing(payload),
        )
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    /// True while the retry budget is not exhausted.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
