//! Ingestion: pull documents from a connector into raw file storage,
//! deduplicating by content hash and source location.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use kbforge_shared::{
    DedupStrategy, IngestionDetails, IngestionMode, IngestionPayload, KbForgeError,
    ProcessingError, Result, ResultDetails, Task, TaskPayload, TaskResult, TaskStatus, TaskType,
    classify_batch, content_hash,
};
use kbforge_storage::{RawFile, RawFileStatus, RawFileStorage};

use super::{ExecutionContext, TaskHandler};
use crate::connector::{ConnectorRegistry, SourceRecord};

fn payload(task: &Task) -> Option<&IngestionPayload> {
    match &task.payload {
        TaskPayload::Ingestion(p) => Some(p),
        _ => None,
    }
}

/// How one source record was classified against storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    New,
    Updated,
    /// Identical content is already stored.
    Unchanged,
    /// Changed content for a known source under [`DedupStrategy::Skip`].
    Skipped,
}

/// Handler for [`TaskType::Ingestion`].
pub struct IngestionHandler {
    connectors: Arc<ConnectorRegistry>,
    raw_files: Arc<dyn RawFileStorage>,
}

impl IngestionHandler {
    pub fn new(connectors: Arc<ConnectorRegistry>, raw_files: Arc<dyn RawFileStorage>) -> Self {
        Self {
            connectors,
            raw_files,
        }
    }

    fn store(&self, task: &Task, dedup: DedupStrategy, record: SourceRecord) -> Result<Outcome> {
        let kb = &task.knowledge_base_id;
        let hash = content_hash(&record.content);
        if self.raw_files.exists_by_hash(kb, &hash)? {
            return Ok(Outcome::Unchanged);
        }

        if let Some(mut existing) = self.raw_files.find_by_source(kb, &record.source_uri)? {
            if dedup == DedupStrategy::Skip {
                return Ok(Outcome::Skipped);
            }
            existing.content_hash = hash;
            existing.version += 1;
            existing.status = RawFileStatus::Ingested;
            existing.name = record.name;
            existing.mime_type = record.mime_type.or(existing.mime_type);
            existing.metadata = record.metadata;
            let saved = self.raw_files.save(existing, record.content)?;
            debug!(file_id = %saved.id, version = saved.version, "raw file updated");
            return Ok(Outcome::Updated);
        }

        let mut file = RawFile::new(
            kb.as_str(),
            record.source_uri,
            record.name,
            hash,
            record.content.len(),
        );
        file.mime_type = record.mime_type;
        file.metadata = record.metadata;
        let saved = self.raw_files.save(file, record.content)?;
        debug!(file_id = %saved.id, "raw file stored");
        Ok(Outcome::New)
    }
}

impl TaskHandler for IngestionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Ingestion
    }

    fn validate(&self, task: &Task) -> Vec<String> {
        let Some(payload) = payload(task) else {
            return vec![format!("expected INGESTION payload, got {}", task.task_type())];
        };
        let mut errors = Vec::new();
        if task.knowledge_base_id.trim().is_empty() {
            errors.push("knowledge_base_id is required".to_string());
        }
        if payload.connector_type.trim().is_empty() {
            errors.push("connector_type is required".to_string());
        } else if !self.connectors.contains(&payload.connector_type) {
            errors.push(format!("unknown connector type '{}'", payload.connector_type));
        }
        if payload.mode == IngestionMode::Incremental && payload.since.is_none() {
            errors.push("incremental ingestion requires 'since'".to_string());
        }
        errors
    }

    fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> Result<TaskResult> {
        let started_at = Utc::now();
        let payload = payload(task)
            .ok_or_else(|| KbForgeError::validation("expected INGESTION payload"))?;

        let mut connector = self.connectors.create(&payload.connector_type)?;
        connector.configure(&payload.connector_config)?;

        let probe = connector.validate_connection();
        if !probe.ok {
            warn!(connector = %payload.connector_type, message = %probe.message, "connection check failed");
            let error = ProcessingError::new(
                task.id.as_str(),
                payload.connector_type.as_str(),
                "connect",
                "ConnectionError",
                probe.message,
                true,
            );
            return Ok(TaskResult::empty(task, TaskStatus::Failed, started_at, self.empty_details(task))
                .with_errors(vec![error]));
        }

        let records = match (payload.mode, payload.since) {
            (IngestionMode::Incremental, Some(since)) if connector.supports_incremental() => {
                connector.fetch_incremental(since)?
            }
            (IngestionMode::Incremental, _) => {
                warn!(
                    connector = %payload.connector_type,
                    "connector does not support incremental fetch, falling back to full fetch"
                );
                connector.fetch()?
            }
            (IngestionMode::Full, _) => connector.fetch()?,
        };

        info!(
            connector = %payload.connector_type,
            mode = ?payload.mode,
            dedup = ?payload.dedup_strategy,
            "ingestion started"
        );

        let mut details = IngestionDetails::default();
        let mut errors = Vec::new();
        let (mut total, mut failed, mut skipped) = (0, 0, 0);
        let mut cancelled = false;

        for item in records {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            total += 1;
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    failed += 1;
                    errors.push(ProcessingError::from_error("unknown", "unknown", "fetch", &e, true));
                    continue;
                }
            };
            let (uri, name) = (record.source_uri.clone(), record.name.clone());
            match self.store(task, payload.dedup_strategy, record) {
                Ok(Outcome::New) => details.new_files += 1,
                Ok(Outcome::Updated) => details.updated_files += 1,
                Ok(Outcome::Unchanged) => {
                    details.unchanged_files += 1;
                    skipped += 1;
                }
                Ok(Outcome::Skipped) => skipped += 1,
                Err(e) => {
                    warn!(source_uri = %uri, error = %e, "failed to store record");
                    failed += 1;
                    errors.push(ProcessingError::from_error(uri, name, "store", &e, true));
                }
            }
        }

        let succeeded = details.new_files + details.updated_files;
        let status = classify_batch(cancelled, succeeded, failed);
        info!(
            status = %status,
            new = details.new_files,
            updated = details.updated_files,
            unchanged = details.unchanged_files,
            failed,
            "ingestion finished"
        );

        let mut result = TaskResult::empty(task, status, started_at, ResultDetails::Ingestion(details))
            .with_errors(errors);
        result.total_items = total;
        result.succeeded_count = succeeded;
        result.failed_count = failed;
        result.skipped_count = skipped;
        Ok(result)
    }

    fn empty_details(&self, _task: &Task) -> ResultDetails {
        ResultDetails::Ingestion(IngestionDetails::default())
    }
}
