//! Worker pool that drains the task queue through registered executors.
//!
//! Each worker is an OS thread looping over: pause gate, shutdown check,
//! dequeue in configured type order, execute, route the result back to the
//! queue, publish domain events. Idle workers park on a condition variable
//! for one poll interval so `stop` and `resume` wake them immediately.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use kbforge_shared::{
    AppConfig, KbForgeError, Result, ResultDetails, Task, TaskId, TaskResult, TaskStatus, TaskType,
};

use crate::events::{EventBus, PipelineEvent};
use crate::executor::{Executor, panic_message};
use crate::queue::TaskQueue;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Runtime settings for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    /// Idle wait between empty polls.
    pub poll_interval: Duration,
    /// Default deadline for a graceful [`Scheduler::shutdown`].
    pub stop_timeout: Duration,
    /// Task types workers poll for, in probe order.
    pub task_types: Vec<TaskType>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(30),
            task_types: TaskType::ALL.to_vec(),
        }
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        let settings = &config.scheduler;
        Self {
            worker_count: settings.worker_count,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            stop_timeout: Duration::from_secs(settings.stop_timeout_secs),
            task_types: settings.task_types.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    queue: Arc<TaskQueue>,
    config: SchedulerConfig,
    executors: Mutex<HashMap<TaskType, Arc<dyn Executor>>>,
    /// Pause flag. Its condvar also serves as the idle/shutdown wakeup.
    paused: Mutex<bool>,
    wake: Condvar,
    active: AtomicUsize,
    events: Option<Arc<dyn EventBus>>,
}

impl Shared {
    fn executor(&self, task_type: TaskType) -> Option<Arc<dyn Executor>> {
        lock(&self.executors).get(&task_type).cloned()
    }

    fn signal(&self) {
        let _paused = lock(&self.paused);
        self.wake.notify_all();
    }
}

/// Decrements the active counter however task execution exits.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Workers of one `start`..`stop` cycle.
struct Run {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-size pool of worker threads executing queued tasks.
pub struct Scheduler {
    shared: Arc<Shared>,
    run: Mutex<Option<Run>>,
}

impl Scheduler {
    pub fn new(queue: Arc<TaskQueue>, config: SchedulerConfig) -> Self {
        Self::build(queue, config, None)
    }

    /// Like [`Scheduler::new`], publishing task events to `events`.
    pub fn with_event_bus(queue: Arc<TaskQueue>, config: SchedulerConfig, events: Arc<dyn EventBus>) -> Self {
        Self::build(queue, config, Some(events))
    }

    fn build(queue: Arc<TaskQueue>, config: SchedulerConfig, events: Option<Arc<dyn EventBus>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                config,
                executors: Mutex::new(HashMap::new()),
                paused: Mutex::new(false),
                wake: Condvar::new(),
                active: AtomicUsize::new(0),
                events,
            }),
            run: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Register the executor for its task type. One executor per type.
    pub fn register_executor(&self, executor: Arc<dyn Executor>) -> Result<()> {
        let task_type = executor.task_type();
        let mut executors = lock(&self.shared.executors);
        if executors.contains_key(&task_type) {
            return Err(KbForgeError::duplicate("executor", task_type.as_str()));
        }
        executors.insert(task_type, executor);
        info!(task_type = %task_type, "executor registered");
        Ok(())
    }

    pub fn get_executor(&self, task_type: TaskType) -> Option<Arc<dyn Executor>> {
        self.shared.executor(task_type)
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> Result<()> {
        let mut run = lock(&self.run);
        if run.is_some() {
            return Err(KbForgeError::Scheduler("scheduler is already running".into()));
        }
        {
            let executors = lock(&self.shared.executors);
            if executors.is_empty() {
                return Err(KbForgeError::Scheduler("no executors registered".into()));
            }
            if let Some(missing) = self
                .shared
                .config
                .task_types
                .iter()
                .find(|t| !executors.contains_key(*t))
            {
                return Err(KbForgeError::Scheduler(format!(
                    "no executor registered for task type {missing}"
                )));
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(self.shared.config.worker_count);
        for index in 0..self.shared.config.worker_count {
            let shared = self.shared.clone();
            let stop_flag = shutdown.clone();
            let spawned = thread::Builder::new()
                .name(format!("kbforge-worker-{index}"))
                .spawn(move || worker_loop(&shared, &stop_flag, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::SeqCst);
                    self.shared.signal();
                    return Err(KbForgeError::Scheduler(format!("failed to spawn worker: {e}")));
                }
            }
        }

        info!(
            workers = workers.len(),
            task_types = ?self.shared.config.task_types,
            "scheduler started"
        );
        *run = Some(Run { shutdown, workers });
        Ok(())
    }

    /// Signal workers to exit. A graceful stop waits up to `timeout` for
    /// in-flight tasks; workers still busy afterwards are logged and detached.
    /// Returns the number of detached workers.
    pub fn stop(&self, graceful: bool, timeout: Duration) -> usize {
        let Some(run) = lock(&self.run).take() else {
            return 0;
        };
        run.shutdown.store(true, Ordering::SeqCst);
        self.shared.signal();

        if !graceful {
            info!(workers = run.workers.len(), "scheduler stopped without waiting");
            return run.workers.len();
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && run.workers.iter().any(|h| !h.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }

        let mut detached = 0;
        for handle in run.workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if !handle.is_finished() {
                warn!(worker = %name, "worker still busy after stop timeout, detaching");
                detached += 1;
                continue;
            }
            if handle.join().is_err() {
                error!(worker = %name, "worker thread panicked");
            }
        }
        info!(detached, "scheduler stopped");
        detached
    }

    /// Graceful stop using the configured timeout.
    pub fn shutdown(&self) -> usize {
        self.stop(true, self.shared.config.stop_timeout)
    }

    /// Workers finish their current task, then wait.
    pub fn pause(&self) {
        *lock(&self.shared.paused) = true;
        info!("scheduler paused");
    }

    pub fn resume(&self) {
        *lock(&self.shared.paused) = false;
        self.shared.wake.notify_all();
        info!("scheduler resumed");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run).is_some()
    }

    pub fn is_paused(&self) -> bool {
        *lock(&self.shared.paused)
    }

    /// Tasks currently inside an executor.
    pub fn active_task_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        lock(&self.run).as_ref().map_or(0, |run| run.workers.len())
    }

    /// Cancel a task: pending tasks are cancelled in the queue, running tasks
    /// are flagged on their executor and finish as CANCELLED cooperatively.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        if self.shared.queue.cancel(task_id) {
            return true;
        }
        let Some(task) = self.shared.queue.get_task(task_id) else {
            return false;
        };
        self.shared
            .executor(task.task_type())
            .is_some_and(|executor| executor.cancel(task_id))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(run) = lock(&self.run).take() {
            run.shutdown.store(true, Ordering::SeqCst);
            self.shared.signal();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .field("active", &self.active_task_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn worker_loop(shared: &Shared, shutdown: &AtomicBool, index: usize) {
    debug!(worker = index, "worker started");
    loop {
        {
            let mut paused = lock(&shared.paused);
            while *paused && !shutdown.load(Ordering::SeqCst) {
                paused = shared.wake.wait(paused).unwrap_or_else(PoisonError::into_inner);
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let task = shared
            .config
            .task_types
            .iter()
            .find_map(|task_type| shared.queue.dequeue(*task_type));

        match task {
            Some(task) => run_task(shared, task),
            None => {
                let paused = lock(&shared.paused);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let _ = shared
                    .wake
                    .wait_timeout(paused, shared.config.poll_interval)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
    debug!(worker = index, "worker exiting");
}

#[instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type()))]
fn run_task(shared: &Shared, task: Task) {
    let Some(executor) = shared.executor(task.task_type()) else {
        error!("no executor for dequeued task");
        if let Err(e) = shared.queue.fail(&task.id, "no executor registered", None) {
            error!(error = %e, "failed to record task failure");
        }
        return;
    };

    let outcome = {
        let _active = ActiveGuard::enter(&shared.active);
        catch_unwind(AssertUnwindSafe(|| executor.execute(&task)))
    };

    let result = match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(error = %message, "executor panicked");
            if let Err(e) = shared.queue.fail(&task.id, &message, None) {
                error!(error = %e, "failed to record task failure");
            }
            return;
        }
    };

    debug!(
        status = %result.status,
        succeeded = result.succeeded_count,
        failed = result.failed_count,
        "task finished"
    );
    let routed = catch_unwind(AssertUnwindSafe(|| match result.status {
        TaskStatus::Completed => shared.queue.complete(&task.id, result.clone()),
        TaskStatus::Cancelled => shared.queue.record_cancelled(&task.id, result.clone()),
        _ => shared
            .queue
            .fail(&task.id, &result.error_summary(), Some(result.clone())),
    }));
    match routed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "failed to record task result");
            return;
        }
        Err(payload) => {
            error!(error = %panic_message(payload.as_ref()), "queue panicked while recording task result");
            return;
        }
    }

    publish_events(shared, &task, &result);
}

fn publish_events(shared: &Shared, task: &Task, result: &TaskResult) {
    let Some(bus) = &shared.events else {
        return;
    };
    let Some(status) = shared.queue.get_task_status(&task.id) else {
        return;
    };

    let event = match (task.task_type(), &result.details) {
        (TaskType::Indexing, details) if status.is_terminal() => PipelineEvent::BuildTaskCompleted {
            task_id: task.id.clone(),
            knowledge_base_id: task.knowledge_base_id.clone(),
            knowledge_base_version_id: task.knowledge_base_version_id.clone(),
            status,
            collection_name: match details {
                ResultDetails::Indexing(d) => Some(d.collection_name.clone()),
                _ => None,
            },
        },
        (TaskType::Publishing, ResultDetails::Publishing(d)) if status == TaskStatus::Completed => {
            PipelineEvent::VersionPublished {
                task_id: task.id.clone(),
                knowledge_base_id: task.knowledge_base_id.clone(),
                knowledge_base_version_id: task.knowledge_base_version_id.clone(),
                environment_id: d.environment_id.clone(),
                alias_name: d.alias_name.clone(),
                collection_name: d.collection_name.clone(),
            }
        }
        _ => return,
    };

    if let Err(e) = bus.publish(&event) {
        warn!(event = event.name(), error = %e, "event publish failed");
    }
}
