//! Task orchestration engine for kbforge.
//!
//! This crate ties the task queue, the executor framework and the worker
//! scheduler together with the processing pipeline that indexing runs per
//! file. Storage, connectors and steps are injected as trait objects.

pub mod connector;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{ConnectionResult, Connector, ConnectorRegistry, RecordStream, SourceRecord};
pub use events::{EventBus, PipelineEvent, RecordingEventBus};
pub use executor::{
    ExecutionContext, Executor, IndexingHandler, IngestionHandler, ManagedExecutor,
    PublishingHandler, TaskHandler, collection_name,
};
pub use observability::{ObservabilityContext, ObservabilityFactory, TracingObservability};
pub use pipeline::{
    Chunk, Embedding, ParsedDocument, PipelineRunner, ProcessingContext, ProcessingStep,
    StepCategory, StepRegistry,
};
pub use queue::{TaskFilter, TaskQueue};
pub use scheduler::{Scheduler, SchedulerConfig};
