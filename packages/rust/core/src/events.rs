//! Domain events emitted by the scheduler when tasks finish.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use kbforge_shared::{Result, TaskId, TaskStatus};

/// Notification for downstream consumers (version bookkeeping, webhooks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// An indexing task reached a terminal state.
    BuildTaskCompleted {
        task_id: TaskId,
        knowledge_base_id: String,
        knowledge_base_version_id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_name: Option<String>,
    },
    /// A publishing task completed.
    VersionPublished {
        task_id: TaskId,
        knowledge_base_id: String,
        knowledge_base_version_id: String,
        environment_id: String,
        alias_name: String,
        collection_name: String,
    },
}

impl PipelineEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::BuildTaskCompleted { task_id, .. } | Self::VersionPublished { task_id, .. } => task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildTaskCompleted { .. } => "build_task_completed",
            Self::VersionPublished { .. } => "version_published",
        }
    }
}

/// Sink for [`PipelineEvent`]s. Errors are logged by the publisher and never
/// affect task outcomes.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &PipelineEvent) -> Result<()>;
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events published so far, oldest first.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EventBus for RecordingEventBus {
    fn publish(&self, event: &PipelineEvent) -> Result<()> {
        tracing::debug!(event = event.name(), task_id = %event.task_id(), "event published");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
