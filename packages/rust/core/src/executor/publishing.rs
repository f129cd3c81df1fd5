//! Publishing: point an environment's alias at a built collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use kbforge_shared::{
    KbForgeError, ProcessingError, PublishStrategy, PublishingDetails, PublishingPayload, Result,
    ResultDetails, Task, TaskPayload, TaskResult, TaskStatus, TaskType,
};
use kbforge_storage::IndexStorage;

use super::{ExecutionContext, TaskHandler, collection_name};

fn payload(task: &Task) -> Option<&PublishingPayload> {
    match &task.payload {
        TaskPayload::Publishing(p) => Some(p),
        _ => None,
    }
}

fn target_collection(task: &Task, payload: &PublishingPayload) -> String {
    payload.collection_name.clone().unwrap_or_else(|| {
        collection_name(&task.knowledge_base_id, &task.knowledge_base_version_id)
    })
}

/// Handler for [`TaskType::Publishing`]. Each environment id maps to the
/// index store that serves it.
#[derive(Default)]
pub struct PublishingHandler {
    environments: BTreeMap<String, Arc<dyn IndexStorage>>,
}

impl PublishingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(mut self, id: impl Into<String>, storage: Arc<dyn IndexStorage>) -> Self {
        self.environments.insert(id.into(), storage);
        self
    }

    pub fn environment_ids(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    fn details(&self, task: &Task, payload: &PublishingPayload) -> PublishingDetails {
        PublishingDetails {
            environment_id: payload.target_environment_id.clone(),
            alias_name: payload.alias_name.clone(),
            collection_name: target_collection(task, payload),
            previous_collection: None,
            strategy: payload.strategy,
        }
    }
}

impl TaskHandler for PublishingHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Publishing
    }

    fn validate(&self, task: &Task) -> Vec<String> {
        let Some(payload) = payload(task) else {
            return vec![format!("expected PUBLISHING payload, got {}", task.task_type())];
        };
        let mut errors = Vec::new();
        let env = payload.target_environment_id.trim();
        if env.is_empty() {
            errors.push("target_environment_id is required".to_string());
        } else if !self.environments.contains_key(env) {
            errors.push(format!("unknown environment '{env}'"));
        }
        if payload.alias_name.trim().is_empty() {
            errors.push("alias_name is required".to_string());
        }
        errors
    }

    fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> Result<TaskResult> {
        let started_at = Utc::now();
        let payload = payload(task)
            .ok_or_else(|| KbForgeError::validation("expected PUBLISHING payload"))?;
        let env = payload.target_environment_id.trim();
        let storage = self
            .environments
            .get(env)
            .ok_or_else(|| KbForgeError::not_found("environment", env))?;

        let mut details = self.details(task, payload);
        let collection = details.collection_name.clone();
        let alias = payload.alias_name.as_str();

        if !storage.collection_exists(&collection)? {
            let error = ProcessingError::new(
                collection.as_str(),
                collection.as_str(),
                "publish",
                "CollectionNotFound",
                format!("collection '{collection}' does not exist in environment '{env}'"),
                false,
            );
            let mut result =
                TaskResult::empty(task, TaskStatus::Failed, started_at, ResultDetails::Publishing(details))
                    .with_errors(vec![error]);
            result.total_items = 1;
            result.failed_count = 1;
            return Ok(result);
        }

        if ctx.is_cancelled() {
            return Ok(TaskResult::empty(
                task,
                TaskStatus::Cancelled,
                started_at,
                ResultDetails::Publishing(details),
            ));
        }

        let previous = storage.get_alias_target(alias)?;
        match (payload.strategy, previous.as_deref()) {
            (PublishStrategy::BlueGreen, Some(current)) if current == collection => {
                info!(alias, collection = %collection, "alias already points at collection");
            }
            (PublishStrategy::BlueGreen, Some(current)) => {
                storage.switch_alias(alias, current, &collection)?;
            }
            (PublishStrategy::BlueGreen, None) | (PublishStrategy::Replace, _) => {
                storage.update_alias(alias, &collection)?;
            }
        }
        info!(
            environment = env,
            alias,
            collection = %collection,
            previous = previous.as_deref().unwrap_or("-"),
            strategy = %payload.strategy,
            "alias published"
        );

        details.previous_collection = previous;
        let mut result =
            TaskResult::empty(task, TaskStatus::Completed, started_at, ResultDetails::Publishing(details));
        result.total_items = 1;
        result.succeeded_count = 1;
        Ok(result)
    }

    fn empty_details(&self, task: &Task) -> ResultDetails {
        let details = payload(task)
            .map(|p| self.details(task, p))
            .unwrap_or_default();
        ResultDetails::Publishing(details)
    }
}
