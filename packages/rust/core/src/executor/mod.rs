//! Executor framework: the uniform lifecycle every task type runs through.
//!
//! A [`TaskHandler`] supplies validation, business logic and result builders.
//! [`ManagedExecutor`] wraps it with running/cancelled bookkeeping, the
//! cancellation check, validation short-circuit, and panic containment, and
//! exposes it to the scheduler as an [`Executor`].

mod indexing;
mod ingestion;
mod publishing;

pub use indexing::{IndexingHandler, collection_name};
pub use ingestion::IngestionHandler;
pub use publishing::PublishingHandler;

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use kbforge_shared::{
    ProcessingError, Result, ResultDetails, Task, TaskId, TaskResult, TaskStatus, TaskType,
};

use crate::observability::{ObservabilityContext, ObservabilityFactory, TracingObservability};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// What the scheduler sees: one executor per task type.
pub trait Executor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Pure check of the payload. Empty means valid.
    fn validate(&self, task: &Task) -> Vec<String>;

    /// Run the task to a result. Never panics and never returns an error;
    /// every failure is expressed in the returned [`TaskResult`].
    fn execute(&self, task: &Task) -> TaskResult;

    /// Flag a running task for cooperative cancellation. Returns false if the
    /// task is not running on this executor.
    fn cancel(&self, task_id: &TaskId) -> bool;
}

/// Per-task-type business logic plugged into [`ManagedExecutor`].
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    fn validate(&self, task: &Task) -> Vec<String>;

    /// The actual work. `Err` becomes a fatal result.
    fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> Result<TaskResult>;

    /// Zero-valued details used by the default result builders.
    fn empty_details(&self, task: &Task) -> ResultDetails;

    fn cancelled_result(&self, task: &Task, started_at: DateTime<Utc>) -> TaskResult {
        TaskResult::empty(task, TaskStatus::Cancelled, started_at, self.empty_details(task))
    }

    fn validation_error_result(
        &self,
        task: &Task,
        errors: &[String],
        started_at: DateTime<Utc>,
    ) -> TaskResult {
        let error = ProcessingError::new(
            task.id.as_str(),
            task.task_type().as_str(),
            "validation",
            "ValidationError",
            errors.join("; "),
            false,
        );
        TaskResult::empty(task, TaskStatus::Failed, started_at, self.empty_details(task))
            .with_errors(vec![error])
    }

    fn fatal_error_result(
        &self,
        task: &Task,
        error_type: &str,
        message: &str,
        stacktrace: Option<String>,
        started_at: DateTime<Utc>,
    ) -> TaskResult {
        let error = ProcessingError::new(
            task.id.as_str(),
            task.task_type().as_str(),
            "execute",
            error_type,
            message,
            false,
        )
        .with_stacktrace(stacktrace);
        TaskResult::empty(task, TaskStatus::Failed, started_at, self.empty_details(task))
            .with_errors(vec![error])
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunState {
    running: HashSet<TaskId>,
    cancelled: HashSet<TaskId>,
}

/// Handed to [`TaskHandler::execute_impl`]: observability plus a cancellation probe.
pub struct ExecutionContext<'a> {
    observability: ObservabilityContext,
    task_id: TaskId,
    state: &'a Mutex<RunState>,
}

impl ExecutionContext<'_> {
    pub fn observability(&self) -> &ObservabilityContext {
        &self.observability
    }

    /// True once [`Executor::cancel`] has flagged this task. Poll between items.
    pub fn is_cancelled(&self) -> bool {
        lock(self.state).cancelled.contains(&self.task_id)
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the task from both sets however `execute` exits.
struct RunningGuard<'a> {
    state: &'a Mutex<RunState>,
    task_id: TaskId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.running.remove(&self.task_id);
        state.cancelled.remove(&self.task_id);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn captured_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
}

// ---------------------------------------------------------------------------
// ManagedExecutor
// ---------------------------------------------------------------------------

/// Generic lifecycle wrapper around a [`TaskHandler`].
pub struct ManagedExecutor<H> {
    handler: H,
    observability: Arc<dyn ObservabilityFactory>,
    state: Mutex<RunState>,
}

impl<H: TaskHandler> ManagedExecutor<H> {
    pub fn new(handler: H) -> Self {
        Self::with_observability(handler, Arc::new(TracingObservability))
    }

    pub fn with_observability(handler: H, observability: Arc<dyn ObservabilityFactory>) -> Self {
        Self {
            handler,
            observability,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        lock(&self.state).running.contains(task_id)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.state).running.len()
    }

    fn register(&self, task_id: &TaskId) -> RunningGuard<'_> {
        lock(&self.state).running.insert(task_id.clone());
        RunningGuard {
            state: &self.state,
            task_id: task_id.clone(),
        }
    }
}

impl<H: TaskHandler> Executor for ManagedExecutor<H> {
    fn task_type(&self) -> TaskType {
        self.handler.task_type()
    }

    fn validate(&self, task: &Task) -> Vec<String> {
        self.handler.validate(task)
    }

    fn execute(&self, task: &Task) -> TaskResult {
        let started_at = Utc::now();
        let _running = self.register(&task.id);

        let ctx = ExecutionContext {
            observability: self.observability.create(task),
            task_id: task.id.clone(),
            state: &self.state,
        };
        let span = ctx.observability().span().clone();
        let _enter = span.enter();

        if ctx.is_cancelled() {
            info!(task_id = %task.id, "task cancelled before start");
            return self.handler.cancelled_result(task, started_at);
        }

        let errors = self.handler.validate(task);
        if !errors.is_empty() {
            warn!(task_id = %task.id, errors = ?errors, "task failed validation");
            return self.handler.validation_error_result(task, &errors, started_at);
        }

        match catch_unwind(AssertUnwindSafe(|| self.handler.execute_impl(task, &ctx))) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(task_id = %task.id, error = %e, "task execution failed");
                self.handler
                    .fatal_error_result(task, e.kind(), &e.to_string(), captured_backtrace(), started_at)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(task_id = %task.id, error = %message, "task execution panicked");
                self.handler
                    .fatal_error_result(task, "Panic", &message, captured_backtrace(), started_at)
            }
        }
    }

    fn cancel(&self, task_id: &TaskId) -> bool {
        let mut state = lock(&self.state);
        if !state.running.contains(task_id) {
            return false;
        }
        state.cancelled.insert(task_id.clone());
        info!(task_id = %task_id, "cancellation requested");
        true
    }
}

impl<H> std::fmt::Debug for ManagedExecutor<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ManagedExecutor")
            .field("running", &state.running.len())
            .field("cancelled", &state.cancelled.len())
            .finish()
    }
}
