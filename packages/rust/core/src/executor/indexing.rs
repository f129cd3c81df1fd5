//! Index build: run every raw file of a knowledge base through the processing
//! pipeline and write the resulting records into a versioned collection.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use kbforge_shared::{
    BuildType, IndexingDetails, IndexingPayload, KbForgeError, ProcessingError, Result,
    ResultDetails, Task, TaskPayload, TaskResult, TaskType, classify_batch,
};
use kbforge_storage::{IndexStorage, RawFile, RawFileStatus, RawFileStorage};

use super::{ExecutionContext, TaskHandler};
use crate::pipeline::{PipelineRunner, ProcessingContext, StepRegistry};

/// Collection for a knowledge base version: `kb_<kb8>_v<version8>`, lowercased,
/// with anything outside `[a-z0-9]` replaced by `_`.
pub fn collection_name(knowledge_base_id: &str, version_id: &str) -> String {
    fn prefix(id: &str) -> String {
        id.chars()
            .take(8)
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
    format!("kb_{}_v{}", prefix(knowledge_base_id), prefix(version_id))
}

fn payload(task: &Task) -> Option<&IndexingPayload> {
    match &task.payload {
        TaskPayload::Indexing(p) => Some(p),
        _ => None,
    }
}

/// Handler for [`TaskType::Indexing`].
pub struct IndexingHandler {
    raw_files: Arc<dyn RawFileStorage>,
    index: Arc<dyn IndexStorage>,
    steps: Arc<StepRegistry>,
}

/// Per-build counters.
#[derive(Default)]
struct BuildTally {
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    records_written: usize,
    errors: Vec<ProcessingError>,
}

impl BuildTally {
    fn fail(&mut self, error: ProcessingError) {
        self.failed += 1;
        self.errors.push(error);
    }
}

impl IndexingHandler {
    pub fn new(
        raw_files: Arc<dyn RawFileStorage>,
        index: Arc<dyn IndexStorage>,
        steps: Arc<StepRegistry>,
    ) -> Self {
        Self {
            raw_files,
            index,
            steps,
        }
    }

    /// Files to process, plus ids that were requested but do not exist.
    fn resolve_files(&self, task: &Task, payload: &IndexingPayload) -> Result<(Vec<RawFile>, Vec<String>)> {
        let Some(ids) = &payload.file_ids else {
            return Ok((self.raw_files.list(&task.knowledge_base_id)?, Vec::new()));
        };
        let mut files = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.raw_files.get(id)? {
                Some(file) => files.push(file),
                None => missing.push(id.clone()),
            }
        }
        Ok((files, missing))
    }

    fn mark(&self, file_id: &str, status: RawFileStatus) {
        if let Err(e) = self.raw_files.update_status(file_id, status) {
            warn!(file_id, error = %e, "failed to update raw file status");
        }
    }

    fn process_file(
        &self,
        file: RawFile,
        collection: &str,
        runner: &mut PipelineRunner,
        ctx: &ExecutionContext<'_>,
        tally: &mut BuildTally,
    ) {
        let file_id = file.id.clone();
        let content = match self.raw_files.get_content(&file_id) {
            Ok(Some(content)) => content,
            Ok(None) => {
                let err = KbForgeError::not_found("raw file content", &file_id);
                tally.fail(ProcessingError::from_error(&file_id, &file.name, "load", &err, true));
                self.mark(&file_id, RawFileStatus::Failed);
                return;
            }
            Err(e) => {
                tally.fail(ProcessingError::from_error(&file_id, &file.name, "load", &e, true));
                self.mark(&file_id, RawFileStatus::Failed);
                return;
            }
        };

        let name = file.name.clone();
        let mut pctx = ProcessingContext::new(file, String::from_utf8_lossy(&content).into_owned());
        runner.run(&mut pctx, ctx.observability());

        if pctx.has_errors() {
            debug!(file_id = %file_id, errors = pctx.errors.len(), "file failed processing");
            tally.failed += 1;
            tally.errors.append(&mut pctx.errors);
            self.mark(&file_id, RawFileStatus::Failed);
            return;
        }
        if pctx.should_skip {
            debug!(
                file_id = %file_id,
                reason = pctx.skip_reason.as_deref().unwrap_or(""),
                "file skipped"
            );
            tally.skipped += 1;
            return;
        }

        match self.index.write(collection, &pctx.index_records) {
            Ok(write) if write.failed == 0 => {
                tally.succeeded += 1;
                tally.records_written += write.written;
                self.mark(&file_id, RawFileStatus::Indexed);
            }
            Ok(write) => {
                tally.records_written += write.written;
                tally.failed += 1;
                for (record_id, message) in write.errors {
                    tally.errors.push(ProcessingError::new(
                        &file_id,
                        &name,
                        "write",
                        "StorageError",
                        format!("record {record_id}: {message}"),
                        true,
                    ));
                }
                self.mark(&file_id, RawFileStatus::Failed);
            }
            Err(e) => {
                tally.fail(ProcessingError::from_error(&file_id, &name, "write", &e, true));
                self.mark(&file_id, RawFileStatus::Failed);
            }
        }
    }
}

impl TaskHandler for IndexingHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Indexing
    }

    fn validate(&self, task: &Task) -> Vec<String> {
        let Some(payload) = payload(task) else {
            return vec![format!("expected INDEXING payload, got {}", task.task_type())];
        };
        let mut errors = Vec::new();
        if task.knowledge_base_id.trim().is_empty() {
            errors.push("knowledge_base_id is required".to_string());
        }
        let enabled: Vec<_> = payload.pipeline_config.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            errors.push("pipeline_config has no enabled steps".to_string());
        }
        for step in enabled {
            if !self.steps.contains(&step.step_type) {
                errors.push(format!("unknown step type '{}'", step.step_type));
            }
        }
        if payload.file_ids.as_ref().is_some_and(Vec::is_empty) {
            errors.push("file_ids must not be empty when given".to_string());
        }
        errors
    }

    fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> Result<TaskResult> {
        let started_at = Utc::now();
        let payload = payload(task)
            .ok_or_else(|| KbForgeError::validation("expected INDEXING payload"))?;

        let collection = payload.collection_name.clone().unwrap_or_else(|| {
            collection_name(&task.knowledge_base_id, &task.knowledge_base_version_id)
        });
        if !self.index.collection_exists(&collection)? {
            self.index.create_collection(&collection)?;
        }

        let mut runner = PipelineRunner::from_config(&self.steps, &payload.pipeline_config)?;
        let (files, missing) = self.resolve_files(task, payload)?;

        let mut tally = BuildTally {
            total: files.len() + missing.len(),
            ..Default::default()
        };
        for id in missing {
            let err = KbForgeError::not_found("raw file", &id);
            tally.fail(ProcessingError::from_error(&id, &id, "load", &err, false));
        }

        info!(
            collection = %collection,
            build_type = ?payload.build_type,
            files = tally.total,
            steps = ?runner.step_types(),
            "index build started"
        );

        let mut cancelled = false;
        for file in files {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            if payload.build_type == BuildType::Incremental && file.status == RawFileStatus::Indexed {
                tally.skipped += 1;
                continue;
            }
            self.process_file(file, &collection, &mut runner, ctx, &mut tally);
        }

        let status = classify_batch(cancelled, tally.succeeded, tally.failed);
        info!(
            collection = %collection,
            status = %status,
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            records = tally.records_written,
            "index build finished"
        );

        let details = IndexingDetails {
            collection_name: collection,
            build_type: payload.build_type,
            records_written: tally.records_written,
            step_stats: runner.into_stats(),
        };
        let mut result = TaskResult::empty(task, status, started_at, ResultDetails::Indexing(details))
            .with_errors(tally.errors);
        result.total_items = tally.total;
        result.succeeded_count = tally.succeeded;
        result.failed_count = tally.failed;
        result.skipped_count = tally.skipped;
        Ok(result)
    }

    fn empty_details(&self, task: &Task) -> ResultDetails {
        let details = payload(task)
            .map(|p| IndexingDetails {
                collection_name: p.collection_name.clone().unwrap_or_else(|| {
                    collection_name(&task.knowledge_base_id, &task.knowledge_base_version_id)
                }),
                build_type: p.build_type,
                ..Default::default()
            })
            .unwrap_or_default();
        ResultDetails::Indexing(details)
    }
}
