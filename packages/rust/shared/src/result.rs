//! Task outcomes: results, structured errors, and per-step statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KbForgeError;
use crate::types::{BuildType, PublishStrategy, Task, TaskId, TaskStatus, TaskType};

// ---------------------------------------------------------------------------
// ProcessingError
// ---------------------------------------------------------------------------

/// One structured error attached to a task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    /// Item the error belongs to (file id, record uri, or the task id for task-level errors).
    pub item_id: String,
    pub item_name: String,
    /// Pipeline step or lifecycle phase that produced the error.
    pub step: String,
    pub error_type: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Advisory only: the queue retries regardless of this flag.
    pub recoverable: bool,
}

impl ProcessingError {
    pub fn new(
        item_id: impl Into<String>,
        item_name: impl Into<String>,
        step: impl Into<String>,
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            item_name: item_name.into(),
            step: step.into(),
            error_type: error_type.into(),
            error_message: error_message.into(),
            stacktrace: None,
            timestamp: Utc::now(),
            recoverable,
        }
    }

    /// Build from a [`KbForgeError`], using its variant name as `error_type`.
    pub fn from_error(
        item_id: impl Into<String>,
        item_name: impl Into<String>,
        step: impl Into<String>,
        error: &KbForgeError,
        recoverable: bool,
    ) -> Self {
        Self::new(
            item_id,
            item_name,
            step,
            error.kind(),
            error.to_string(),
            recoverable,
        )
    }

    pub fn with_stacktrace(mut self, stacktrace: Option<String>) -> Self {
        self.stacktrace = stacktrace;
        self
    }
}

// ---------------------------------------------------------------------------
// StepStats
// ---------------------------------------------------------------------------

/// Running aggregate for one pipeline step across all files of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub step_type: String,
    pub input_count: usize,
    pub output_count: usize,
    pub duration_seconds: f64,
    pub errors_count: usize,
}

impl StepStats {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            input_count: 0,
            output_count: 0,
            duration_seconds: 0.0,
            errors_count: 0,
        }
    }

    /// Merge one invocation into the aggregate.
    pub fn record(&mut self, input: usize, output: usize, duration_seconds: f64, errors: usize) {
        self.input_count += input;
        self.output_count += output;
        self.duration_seconds += duration_seconds;
        self.errors_count += errors;
    }

    /// Fraction of inputs that produced output. 1.0 when nothing came in and nothing failed.
    pub fn success_rate(&self) -> f64 {
        if self.input_count == 0 {
            return if self.errors_count == 0 { 1.0 } else { 0.0 };
        }
        (self.output_count as f64 / self.input_count as f64).min(1.0)
    }
}

// ---------------------------------------------------------------------------
// Result details
// ---------------------------------------------------------------------------

/// Ingestion classification counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionDetails {
    pub new_files: usize,
    pub updated_files: usize,
    pub unchanged_files: usize,
}

/// Index build outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexingDetails {
    pub collection_name: String,
    pub build_type: BuildType,
    pub records_written: usize,
    /// Per-step aggregates in pipeline order.
    pub step_stats: Vec<StepStats>,
}

/// Alias change performed by a publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishingDetails {
    pub environment_id: String,
    pub alias_name: String,
    pub collection_name: String,
    /// The alias target before the publish, for manual rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_collection: Option<String>,
    pub strategy: PublishStrategy,
}

/// Type-specific part of a result, mirroring [`crate::TaskPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultDetails {
    Ingestion(IngestionDetails),
    Indexing(IndexingDetails),
    Publishing(PublishingDetails),
}

impl ResultDetails {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Ingestion(_) => TaskType::Ingestion,
            Self::Indexing(_) => TaskType::Indexing,
            Self::Publishing(_) => TaskType::Publishing,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Outcome of one task execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub total_items: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<ProcessingError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub details: ResultDetails,
}

impl TaskResult {
    /// A result with zeroed counts, completed now.
    pub fn empty(
        task: &Task,
        status: TaskStatus,
        started_at: DateTime<Utc>,
        details: ResultDetails,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type(),
            status,
            total_items: 0,
            succeeded_count: 0,
            failed_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            started_at,
            completed_at: Utc::now(),
            details,
        }
    }

    pub fn with_errors(mut self, errors: Vec<ProcessingError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.succeeded_count as f64 / self.total_items as f64
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.completed_at - self.started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(0.0)
    }

    /// First error message, used as the failure reason handed to the queue.
    pub fn error_summary(&self) -> String {
        match self.errors.first() {
            Some(err) if self.errors.len() > 1 => {
                format!("{} (+{} more)", err.error_message, self.errors.len() - 1)
            }
            Some(err) => err.error_message.clone(),
            None => format!("task finished with status {}", self.status),
        }
    }
}

/// Final status rule shared by batch executors: all-failed is a hard failure,
/// partial failure still completes.
pub fn classify_batch(cancelled: bool, succeeded: usize, failed: usize) -> TaskStatus {
    if cancelled {
        TaskStatus::Cancelled
    } else if failed > 0 && succeeded == 0 {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    }
}
