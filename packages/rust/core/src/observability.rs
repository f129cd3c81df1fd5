//! Per-task observability context threaded through executors, steps and connectors.
//!
//! The executor framework never inspects the context; it only creates it from
//! the task identity and hands it to business logic.

use std::collections::BTreeMap;

use tracing::Span;

use kbforge_shared::{Task, TaskId, TaskType};

/// Opaque tracing/metrics handle for one task execution.
#[derive(Debug, Clone)]
pub struct ObservabilityContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub knowledge_base_id: String,
    pub knowledge_base_version_id: String,
    span: Span,
    attributes: BTreeMap<String, String>,
}

impl ObservabilityContext {
    pub fn new(task: &Task, span: Span) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type(),
            knowledge_base_id: task.knowledge_base_id.clone(),
            knowledge_base_version_id: task.knowledge_base_version_id.clone(),
            span,
            attributes: BTreeMap::new(),
        }
    }

    /// The span business logic should run inside.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Extra key/value pairs attached by the factory.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Builds an [`ObservabilityContext`] from a task's identity.
pub trait ObservabilityFactory: Send + Sync {
    fn create(&self, task: &Task) -> ObservabilityContext;
}

/// Default factory: one `tracing` span per task execution.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObservability;

impl ObservabilityFactory for TracingObservability {
    fn create(&self, task: &Task) -> ObservabilityContext {
        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            task_type = %task.task_type(),
            kb_id = %task.knowledge_base_id,
            kb_version_id = %task.knowledge_base_version_id,
        );
        ObservabilityContext::new(task, span)
    }
}
