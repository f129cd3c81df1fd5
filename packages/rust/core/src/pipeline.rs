//! Per-file processing context, the step contract, and the pipeline runner.
//!
//! The runner applies configured steps in order to one [`ProcessingContext`].
//! A failing step is recorded and the runner moves on; a step that calls
//! [`ProcessingContext::mark_skip`] halts the remaining steps for that file.
//! Step statistics live on the runner and accumulate across every file of a task.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kbforge_shared::{KbForgeError, ProcessingError, Result, StepConfig, StepStats};
use kbforge_storage::{IndexRecord, RawFile};

use crate::executor::panic_message;
use crate::observability::ObservabilityContext;

// ---------------------------------------------------------------------------
// Context data
// ---------------------------------------------------------------------------

/// Output of a parser step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Plain text body.
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A slice of the parsed text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// Byte offsets into `ParsedDocument::text`.
    pub start_offset: usize,
    pub end_offset: usize,
    /// Per-chunk enrichment output.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Vector for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_index: usize,
    pub vector: Vec<f32>,
}

/// One file's in-flight data, owned by the indexing executor while the file is processed.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub raw_file: RawFile,
    pub file_version: u32,
    pub raw_content: String,
    pub parsed_document: Option<ParsedDocument>,
    pub chunks: Vec<Chunk>,
    /// Document-level enrichments keyed by enricher output name.
    pub enrichments: BTreeMap<String, serde_json::Value>,
    pub embeddings: Vec<Embedding>,
    pub index_records: Vec<IndexRecord>,
    /// Append-only.
    pub errors: Vec<ProcessingError>,
    pub should_skip: bool,
    pub skip_reason: Option<String>,
}

impl ProcessingContext {
    pub fn new(raw_file: RawFile, raw_content: String) -> Self {
        Self {
            file_version: raw_file.version,
            raw_file,
            raw_content,
            parsed_document: None,
            chunks: Vec::new(),
            enrichments: BTreeMap::new(),
            embeddings: Vec::new(),
            index_records: Vec::new(),
            errors: Vec::new(),
            should_skip: false,
            skip_reason: None,
        }
    }

    /// Stop running further steps for this file. The first reason wins.
    pub fn mark_skip(&mut self, reason: impl Into<String>) {
        if !self.should_skip {
            self.should_skip = true;
            self.skip_reason = Some(reason.into());
        }
    }

    pub fn add_error(&mut self, error: ProcessingError) {
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Step contract
// ---------------------------------------------------------------------------

/// The five step shapes. Determines how input/output counts are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Parser,
    Chunker,
    Enricher,
    Embedder,
    IndexBuilder,
}

impl StepCategory {
    /// Items the step is about to consume.
    pub fn input_count(&self, ctx: &ProcessingContext) -> usize {
        match self {
            Self::Parser | Self::Chunker => 1,
            Self::Enricher | Self::Embedder => ctx.chunks.len(),
            Self::IndexBuilder => ctx.embeddings.len(),
        }
    }

    /// Items the step produced.
    pub fn output_count(&self, ctx: &ProcessingContext) -> usize {
        match self {
            Self::Parser => usize::from(ctx.parsed_document.is_some()),
            Self::Chunker => ctx.chunks.len(),
            Self::Enricher => ctx.chunks.iter().filter(|c| !c.metadata.is_empty()).count(),
            Self::Embedder => ctx.embeddings.len(),
            Self::IndexBuilder => ctx.index_records.len(),
        }
    }
}

/// A configurable transformation applied to a [`ProcessingContext`].
pub trait ProcessingStep: Send {
    /// Registry key, e.g. `fixed_size`.
    fn step_type(&self) -> &str;

    fn category(&self) -> StepCategory;

    /// Apply step-specific settings. Called once per task before any file.
    fn configure(&mut self, config: &serde_json::Value) -> Result<()>;

    /// Transform the context in place. Returning `Err` records a recoverable
    /// error for the file; the runner continues with the next step.
    fn process(&self, context: &mut ProcessingContext, obs: &ObservabilityContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type StepFactory = Box<dyn Fn() -> Box<dyn ProcessingStep> + Send + Sync>;

/// Maps step type keys to factories. Populated once at startup.
#[derive(Default)]
pub struct StepRegistry {
    factories: BTreeMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `step_type`. Registering a key twice is an error.
    pub fn register<F>(&mut self, step_type: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn ProcessingStep> + Send + Sync + 'static,
    {
        if self.factories.contains_key(step_type) {
            return Err(KbForgeError::duplicate("step", step_type));
        }
        self.factories.insert(step_type.to_string(), Box::new(factory));
        debug!(step_type, "registered step");
        Ok(())
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    /// A fresh, unconfigured step instance.
    pub fn create(&self, step_type: &str) -> Result<Box<dyn ProcessingStep>> {
        self.factories
            .get(step_type)
            .map(|factory| factory())
            .ok_or_else(|| KbForgeError::not_found("step", step_type))
    }

    pub fn step_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs an ordered list of steps over contexts, accumulating [`StepStats`].
pub struct PipelineRunner {
    steps: Vec<Box<dyn ProcessingStep>>,
    stats: Vec<StepStats>,
}

impl PipelineRunner {
    pub fn new(steps: Vec<Box<dyn ProcessingStep>>) -> Self {
        let mut stats: Vec<StepStats> = Vec::new();
        for step in &steps {
            if !stats.iter().any(|s| s.step_type == step.step_type()) {
                stats.push(StepStats::new(step.step_type()));
            }
        }
        Self { steps, stats }
    }

    /// Instantiate and configure the enabled steps of `configs`, in order.
    pub fn from_config(registry: &StepRegistry, configs: &[StepConfig]) -> Result<Self> {
        let mut steps = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            let mut step = registry.create(&config.step_type)?;
            step.configure(&config.config).map_err(|e| {
                KbForgeError::step(&config.step_type, format!("invalid configuration: {e}"))
            })?;
            steps.push(step);
        }
        if steps.is_empty() {
            return Err(KbForgeError::validation("pipeline has no enabled steps"));
        }
        Ok(Self::new(steps))
    }

    pub fn step_types(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_type()).collect()
    }

    /// Aggregates so far, in pipeline order.
    pub fn stats(&self) -> &[StepStats] {
        &self.stats
    }

    pub fn into_stats(self) -> Vec<StepStats> {
        self.stats
    }

    /// Apply every step to `ctx` until one marks it skipped.
    pub fn run(&mut self, ctx: &mut ProcessingContext, obs: &ObservabilityContext) {
        for step in &self.steps {
            if ctx.should_skip {
                debug!(
                    file_id = %ctx.raw_file.id,
                    reason = ctx.skip_reason.as_deref().unwrap_or(""),
                    "skipping remaining steps"
                );
                break;
            }

            let step_type = step.step_type().to_string();
            let category = step.category();
            let input = category.input_count(ctx);
            let errors_before = ctx.errors.len();
            let started = Instant::now();

            let outcome = catch_unwind(AssertUnwindSafe(|| step.process(ctx, obs)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((e.kind().to_string(), e.to_string())),
                Err(payload) => Some(("Panic".to_string(), panic_message(payload.as_ref()))),
            };
            if let Some((error_type, message)) = failure {
                warn!(
                    file_id = %ctx.raw_file.id,
                    step = %step_type,
                    error = %message,
                    "step failed, continuing"
                );
                let error = ProcessingError::new(
                    ctx.raw_file.id.clone(),
                    ctx.raw_file.name.clone(),
                    step_type.clone(),
                    error_type,
                    message,
                    true,
                );
                ctx.add_error(error);
            }

            let elapsed = started.elapsed().as_secs_f64();
            let output = category.output_count(ctx);
            let errors = ctx.errors.len() - errors_before;
            if let Some(stats) = self.stats.iter_mut().find(|s| s.step_type == step_type) {
                stats.record(input, output, elapsed, errors);
            }
        }
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("steps", &self.step_types())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{ObservabilityFactory, TracingObservability};
    use crate::testing::{FakeStep, indexing_task, raw_file};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn obs() -> ObservabilityContext {
        TracingObservability.create(&indexing_task(vec![StepConfig::new("fake")]))
    }

    fn context() -> ProcessingContext {
        ProcessingContext::new(raw_file("kb1", "a.md"), "alpha beta".into())
    }

    #[test]
    fn skip_halts_remaining_steps() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let steps: Vec<Box<dyn ProcessingStep>> = vec![
            Box::new(FakeStep::parser()),
            Box::new(FakeStep::skipper("empty document")),
            Box::new(FakeStep::chunker(3).counting(later_calls.clone())),
        ];
        let mut runner = PipelineRunner::new(steps);
        let mut ctx = context();
        runner.run(&mut ctx, &obs());

        assert!(ctx.should_skip);
        assert_eq!(ctx.skip_reason.as_deref(), Some("empty document"));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert!(ctx.chunks.is_empty());
    }

    #[test]
    fn first_skip_reason_is_preserved() {
        let mut ctx = context();
        ctx.mark_skip("first");
        ctx.mark_skip("second");
        assert_eq!(ctx.skip_reason.as_deref(), Some("first"));
    }

    #[test]
    fn failing_step_is_recorded_and_pipeline_continues() {
        let steps: Vec<Box<dyn ProcessingStep>> = vec![
            Box::new(FakeStep::parser()),
            Box::new(FakeStep::failing("enricher", StepCategory::Enricher)),
            Box::new(FakeStep::chunker(2)),
        ];
        let mut runner = PipelineRunner::new(steps);
        let mut ctx = context();
        runner.run(&mut ctx, &obs());

        assert_eq!(ctx.errors.len(), 1);
        assert_eq!(ctx.errors[0].step, "enricher");
        assert!(ctx.errors[0].recoverable);
        assert_eq!(ctx.chunks.len(), 2, "later steps still ran");

        let enricher = runner.stats().iter().find(|s| s.step_type == "enricher").unwrap();
        assert_eq!(enricher.errors_count, 1);
    }

    #[test]
    fn panicking_step_is_contained() {
        let steps: Vec<Box<dyn ProcessingStep>> = vec![
            Box::new(FakeStep::panicking("parser")),
            Box::new(FakeStep::chunker(1)),
        ];
        let mut runner = PipelineRunner::new(steps);
        let mut ctx = context();
        runner.run(&mut ctx, &obs());

        assert_eq!(ctx.errors.len(), 1);
        assert_eq!(ctx.errors[0].error_type, "Panic");
        assert_eq!(ctx.chunks.len(), 1);
    }

    #[test]
    fn stats_accumulate_across_files() {
        let steps: Vec<Box<dyn ProcessingStep>> = vec![
            Box::new(FakeStep::parser()),
            Box::new(FakeStep::chunker(4)),
            Box::new(FakeStep::embedder()),
        ];
        let mut runner = PipelineRunner::new(steps);
        for _ in 0..3 {
            let mut ctx = context();
            runner.run(&mut ctx, &obs());
        }

        let stats = runner.into_stats();
        assert_eq!(
            stats.iter().map(|s| s.step_type.as_str()).collect::<Vec<_>>(),
            vec!["parser", "chunker", "embedder"]
        );
        assert_eq!(stats[0].input_count, 3);
        assert_eq!(stats[0].output_count, 3);
        assert_eq!(stats[1].output_count, 12);
        assert_eq!(stats[2].input_count, 12);
        assert_eq!(stats[2].output_count, 12);
    }

    #[test]
    fn from_config_skips_disabled_and_rejects_unknown() {
        let mut registry = StepRegistry::new();
        registry.register("parser", || Box::new(FakeStep::parser())).unwrap();

        let mut disabled = StepConfig::new("missing");
        disabled.enabled = false;
        let runner = PipelineRunner::from_config(
            &registry,
            &[StepConfig::new("parser"), disabled],
        )
        .expect("build runner");
        assert_eq!(runner.step_types(), vec!["parser"]);

        let err = PipelineRunner::from_config(&registry, &[StepConfig::new("missing")]).unwrap_err();
        assert!(matches!(err, KbForgeError::NotFound { .. }));
    }
}
