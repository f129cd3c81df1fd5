//! Shared fixtures for unit tests: sample tasks, stub collaborators and handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;

use kbforge_shared::{
    IndexingDetails, IndexingPayload, IngestionDetails, IngestionPayload, KbForgeError,
    ProcessingError, PublishingDetails, PublishingPayload, Result, ResultDetails, StepConfig, Task,
    TaskId, TaskResult, TaskStatus, TaskType, content_hash,
};
use kbforge_storage::{IndexRecord, RawFile, RawFileStorage};

use crate::connector::{ConnectionResult, Connector, RecordStream, SourceRecord};
use crate::events::{EventBus, PipelineEvent};
use crate::executor::{ExecutionContext, Executor, TaskHandler};
use crate::observability::{ObservabilityContext, ObservabilityFactory, TracingObservability};
use crate::pipeline::{
    Chunk, Embedding, ParsedDocument, ProcessingContext, ProcessingStep, StepCategory, StepRegistry,
};

// ---------------------------------------------------------------------------
// Tasks and files
// ---------------------------------------------------------------------------

pub(crate) fn ingestion_task(kb: &str) -> Task {
    Task::ingestion(kb, "v1", IngestionPayload {
        connector_type: "static".into(),
        connector_config: json!({}),
        mode: Default::default(),
        since: None,
        dedup_strategy: Default::default(),
    })
}

pub(crate) fn indexing_task(pipeline_config: Vec<StepConfig>) -> Task {
    Task::indexing("kb1", "v1", IndexingPayload {
        pipeline_config,
        build_type: Default::default(),
        file_ids: None,
        collection_name: None,
    })
}

pub(crate) fn publishing_task(env: &str, alias: &str) -> Task {
    Task::publishing("kb1", "v1", PublishingPayload {
        target_environment_id: env.into(),
        alias_name: alias.into(),
        strategy: Default::default(),
        collection_name: None,
    })
}

pub(crate) fn completed_result(task: &Task) -> TaskResult {
    let mut result = TaskResult::empty(task, TaskStatus::Completed, Utc::now(), details_for(task.task_type()));
    result.total_items = 1;
    result.succeeded_count = 1;
    result
}

fn details_for(task_type: TaskType) -> ResultDetails {
    match task_type {
        TaskType::Ingestion => ResultDetails::Ingestion(IngestionDetails::default()),
        TaskType::Indexing => ResultDetails::Indexing(IndexingDetails::default()),
        TaskType::Publishing => ResultDetails::Publishing(PublishingDetails::default()),
    }
}

pub(crate) fn raw_file(kb: &str, name: &str) -> RawFile {
    RawFile::new(kb, name, name, content_hash(name.as_bytes()), name.len())
}

/// Save `content` as a new raw file and return the stored record.
pub(crate) fn store_file(storage: &dyn RawFileStorage, kb: &str, name: &str, content: &str) -> RawFile {
    let file = RawFile::new(kb, name, name, content_hash(content.as_bytes()), content.len());
    storage
        .save(file, content.as_bytes().to_vec())
        .expect("save raw file")
}

pub(crate) fn record(uri: &str, content: &str) -> SourceRecord {
    SourceRecord::new(uri, uri, content.as_bytes().to_vec())
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Serves a fixed list of records, optionally followed by per-record errors.
#[derive(Debug, Clone)]
pub(crate) struct StaticConnector {
    records: Vec<SourceRecord>,
    record_errors: usize,
    fail_connection: bool,
    incremental: bool,
}

impl Default for StaticConnector {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            record_errors: 0,
            fail_connection: false,
            incremental: true,
        }
    }
}

impl StaticConnector {
    pub(crate) fn with_records(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub(crate) fn failing_connection(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub(crate) fn with_record_errors(mut self, count: usize) -> Self {
        self.record_errors = count;
        self
    }

    pub(crate) fn without_incremental(mut self) -> Self {
        self.incremental = false;
        self
    }

    fn stream(&self, since: Option<DateTime<Utc>>) -> RecordStream<'_> {
        let records = self
            .records
            .iter()
            .filter(move |r| match (since, r.modified_at) {
                (Some(since), Some(modified)) => modified >= since,
                _ => true,
            })
            .cloned()
            .map(Ok);
        let errors = (0..self.record_errors)
            .map(|i| Err(KbForgeError::Connection(format!("record {i} unreadable"))));
        Box::new(records.chain(errors))
    }
}

impl Connector for StaticConnector {
    fn connector_type(&self) -> &str {
        "static"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        if config.get("fail_connection").and_then(|v| v.as_bool()) == Some(true) {
            self.fail_connection = true;
        }
        Ok(())
    }

    fn validate_connection(&self) -> ConnectionResult {
        if self.fail_connection {
            ConnectionResult::failed("static source unreachable")
        } else {
            ConnectionResult::ok("static source ready")
        }
    }

    fn fetch(&self) -> Result<RecordStream<'_>> {
        Ok(self.stream(None))
    }

    fn fetch_incremental(&self, since: DateTime<Utc>) -> Result<RecordStream<'_>> {
        Ok(self.stream(Some(since)))
    }

    fn supports_incremental(&self) -> bool {
        self.incremental
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum FakeAction {
    /// Parse `raw_content`; empty input skips, `!fail` errors.
    Parse,
    Chunk(usize),
    Embed,
    Build,
    Skip(String),
    Fail,
    Panic,
}

/// Minimal step used to drive the runner without real parsing.
pub(crate) struct FakeStep {
    step_type: String,
    category: StepCategory,
    action: FakeAction,
    calls: Option<Arc<AtomicUsize>>,
    delay: Duration,
}

impl FakeStep {
    fn new(step_type: &str, category: StepCategory, action: FakeAction) -> Self {
        Self {
            step_type: step_type.into(),
            category,
            action,
            calls: None,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn parser() -> Self {
        Self::new("parser", StepCategory::Parser, FakeAction::Parse)
    }

    pub(crate) fn chunker(chunks: usize) -> Self {
        Self::new("chunker", StepCategory::Chunker, FakeAction::Chunk(chunks))
    }

    pub(crate) fn embedder() -> Self {
        Self::new("embedder", StepCategory::Embedder, FakeAction::Embed)
    }

    pub(crate) fn index_builder() -> Self {
        Self::new("index_builder", StepCategory::IndexBuilder, FakeAction::Build)
    }

    pub(crate) fn skipper(reason: &str) -> Self {
        Self::new("skipper", StepCategory::Parser, FakeAction::Skip(reason.into()))
    }

    pub(crate) fn failing(step_type: &str, category: StepCategory) -> Self {
        Self::new(step_type, category, FakeAction::Fail)
    }

    pub(crate) fn panicking(step_type: &str) -> Self {
        Self::new(step_type, StepCategory::Parser, FakeAction::Panic)
    }

    pub(crate) fn counting(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = Some(calls);
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ProcessingStep for FakeStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    fn category(&self) -> StepCategory {
        self.category
    }

    fn configure(&mut self, _config: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        if let Some(calls) = &self.calls {
            calls.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        match &self.action {
            FakeAction::Parse => {
                if ctx.raw_content.is_empty() {
                    ctx.mark_skip("empty document");
                } else if ctx.raw_content.contains("!fail") {
                    return Err(KbForgeError::step(&self.step_type, "cannot parse document"));
                } else {
                    ctx.parsed_document = Some(ParsedDocument {
                        title: None,
                        text: ctx.raw_content.clone(),
                        metadata: Default::default(),
                    });
                }
            }
            FakeAction::Chunk(count) => {
                let text = ctx
                    .parsed_document
                    .as_ref()
                    .map_or_else(|| ctx.raw_content.clone(), |d| d.text.clone());
                ctx.chunks = (0..*count)
                    .map(|index| Chunk {
                        index,
                        text: text.clone(),
                        start_offset: 0,
                        end_offset: text.len(),
                        metadata: Default::default(),
                    })
                    .collect();
            }
            FakeAction::Embed => {
                ctx.embeddings = ctx
                    .chunks
                    .iter()
                    .map(|c| Embedding {
                        chunk_index: c.index,
                        vector: vec![1.0, 0.5, 0.25],
                    })
                    .collect();
            }
            FakeAction::Build => {
                let file_id = ctx.raw_file.id.clone();
                ctx.index_records = ctx
                    .embeddings
                    .iter()
                    .map(|e| IndexRecord {
                        id: format!("{file_id}-{}", e.chunk_index),
                        file_id: file_id.clone(),
                        chunk_index: e.chunk_index,
                        text: ctx.chunks[e.chunk_index].text.clone(),
                        vector: e.vector.clone(),
                        metadata: Default::default(),
                    })
                    .collect();
            }
            FakeAction::Skip(reason) => ctx.mark_skip(reason.clone()),
            FakeAction::Fail => return Err(KbForgeError::step(&self.step_type, "fake failure")),
            FakeAction::Panic => panic!("fake step panicked"),
        }
        Ok(())
    }
}

/// `parser`, `chunker` (two chunks), `embedder`, `index_builder`, and a
/// `slow_parser` that takes 20ms per file.
pub(crate) fn fake_step_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register("parser", || Box::new(FakeStep::parser())).expect("register");
    registry.register("chunker", || Box::new(FakeStep::chunker(2))).expect("register");
    registry.register("embedder", || Box::new(FakeStep::embedder())).expect("register");
    registry
        .register("index_builder", || Box::new(FakeStep::index_builder()))
        .expect("register");
    registry
        .register("slow_parser", || {
            Box::new(FakeStep::new("slow_parser", StepCategory::Parser, FakeAction::Parse).slow(Duration::from_millis(20)))
        })
        .expect("register");
    registry
}

pub(crate) fn fake_pipeline() -> Vec<StepConfig> {
    ["parser", "chunker", "embedder", "index_builder"]
        .into_iter()
        .map(StepConfig::new)
        .collect()
}

// ---------------------------------------------------------------------------
// Handlers and executors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Complete,
    /// Returns a FAILED result.
    Fail,
    /// Returns `Err` from the business logic.
    Error,
    Panic,
    /// Blocks until cancelled (or five seconds pass).
    WaitForCancel,
}

pub(crate) struct StubHandler {
    task_type: TaskType,
    behavior: Behavior,
    validation_errors: Vec<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubHandler {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            task_type: TaskType::Ingestion,
            behavior,
            validation_errors: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn for_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub(crate) fn with_validation_errors(mut self, errors: Vec<String>) -> Self {
        self.validation_errors = errors;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How many times the business logic ran.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaskHandler for StubHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn validate(&self, _task: &Task) -> Vec<String> {
        self.validation_errors.clone()
    }

    fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> Result<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let started_at = Utc::now();
        match self.behavior {
            Behavior::Complete => {
                let mut result = TaskResult::empty(task, TaskStatus::Completed, started_at, self.empty_details(task));
                result.total_items = 1;
                result.succeeded_count = 1;
                Ok(result)
            }
            Behavior::Fail => {
                let error = ProcessingError::new(task.id.as_str(), "stub", "execute", "StubError", "stub failure", true);
                let mut result = TaskResult::empty(task, TaskStatus::Failed, started_at, self.empty_details(task))
                    .with_errors(vec![error]);
                result.total_items = 1;
                result.failed_count = 1;
                Ok(result)
            }
            Behavior::Error => Err(KbForgeError::Storage("stub storage offline".into())),
            Behavior::Panic => panic!("stub handler exploded"),
            Behavior::WaitForCancel => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !ctx.is_cancelled() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(self.cancelled_result(task, started_at))
            }
        }
    }

    fn empty_details(&self, _task: &Task) -> ResultDetails {
        details_for(self.task_type)
    }
}

/// Executor that panics outside the managed wrapper.
pub(crate) struct PanickingExecutor;

impl Executor for PanickingExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Ingestion
    }

    fn validate(&self, _task: &Task) -> Vec<String> {
        Vec::new()
    }

    fn execute(&self, _task: &Task) -> TaskResult {
        panic!("executor bug")
    }

    fn cancel(&self, _task_id: &TaskId) -> bool {
        false
    }
}

/// Blocks in `create` until the test releases it, so a test can act while a
/// task is registered as running but has not reached its cancellation check.
pub(crate) struct GatedObservability {
    pub(crate) arrived: Barrier,
    pub(crate) release: Barrier,
}

impl GatedObservability {
    pub(crate) fn new() -> Self {
        Self {
            arrived: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl ObservabilityFactory for GatedObservability {
    fn create(&self, task: &Task) -> ObservabilityContext {
        self.arrived.wait();
        self.release.wait();
        TracingObservability.create(task)
    }
}

pub(crate) struct FailingEventBus;

impl EventBus for FailingEventBus {
    fn publish(&self, event: &PipelineEvent) -> Result<()> {
        Err(KbForgeError::Connection(format!("bus down, dropped {}", event.name())))
    }
}
