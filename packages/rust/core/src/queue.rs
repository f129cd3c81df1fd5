//! Priority task queue with delayed availability and retry backoff.
//!
//! All state sits behind one mutex. The heap only holds hints: an entry is
//! re-validated against the status map when popped, so cancelled or purged
//! tasks fall out lazily. A condition variable is signalled on every state
//! change so callers can block on [`TaskQueue::wait_for_terminal`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use kbforge_shared::{KbForgeError, Result, Task, TaskId, TaskResult, TaskStatus, TaskType};

/// Default page size for [`TaskQueue::list_tasks`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Upper bound on the retry backoff.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Backoff before retry number `retry_count`: `2^retry_count` seconds,
/// capped at [`MAX_RETRY_DELAY`].
pub fn retry_delay(retry_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry_count)).min(MAX_RETRY_DELAY)
}

/// `now + delay`, saturating instead of overflowing.
fn available_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Heap entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct HeapEntry {
    priority: i32,
    available_at: DateTime<Utc>,
    sequence: u64,
    task_id: TaskId,
    task_type: TaskType,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Max-heap: higher priority first, then earlier availability, then FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.available_at.cmp(&self.available_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Criteria for [`TaskQueue::list_tasks`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub knowledge_base_id: Option<String>,
    /// Defaults to [`DEFAULT_LIST_LIMIT`].
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_knowledge_base(mut self, knowledge_base_id: impl Into<String>) -> Self {
        self.knowledge_base_id = Some(knowledge_base_id.into());
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn matches(&self, task: &Task, status: TaskStatus) -> bool {
        self.task_type.is_none_or(|t| t == task.task_type())
            && self.status.is_none_or(|s| s == status)
            && self
                .knowledge_base_id
                .as_deref()
                .is_none_or(|kb| kb == task.knowledge_base_id)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    tasks: HashMap<TaskId, Task>,
    statuses: HashMap<TaskId, TaskStatus>,
    results: HashMap<TaskId, TaskResult>,
    sequence: u64,
}

impl QueueState {
    fn push(&mut self, task: &Task, available_at: DateTime<Utc>) {
        self.sequence += 1;
        self.heap.push(HeapEntry {
            priority: task.priority,
            available_at,
            sequence: self.sequence,
            task_id: task.id.clone(),
            task_type: task.task_type(),
        });
        self.statuses.insert(task.id.clone(), TaskStatus::Pending);
    }

    fn task_mut(&mut self, task_id: &TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| KbForgeError::not_found("task", task_id.as_str()))
    }

    /// Mark a task terminal, stamping `completed_at` and storing `result`.
    fn finish(&mut self, task_id: &TaskId, status: TaskStatus, result: Option<TaskResult>) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.completed_at = Some(Utc::now());
        self.statuses.insert(task_id.clone(), status);
        if let Some(result) = result {
            self.results.insert(task_id.clone(), result);
        }
        Ok(())
    }

    fn count(&self, status: TaskStatus, task_type: Option<TaskType>) -> usize {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .filter(|(id, _)| {
                task_type.is_none_or(|t| self.tasks.get(*id).is_some_and(|task| task.task_type() == t))
            })
            .count()
    }
}

/// Thread-safe in-process task queue.
#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `task` as PENDING, dequeue-able once `delay` has elapsed.
    pub fn enqueue(&self, task: Task, delay: Duration) -> Result<TaskId> {
        let available_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| KbForgeError::validation(format!("delay out of range: {delay:?}")))?;
        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(KbForgeError::duplicate("task", task.id.as_str()));
        }

        let task_id = task.id.clone();
        state.push(&task, available_at);
        info!(
            task_id = %task_id,
            task_type = %task.task_type(),
            priority = task.priority,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task enqueued"
        );
        state.tasks.insert(task_id.clone(), task);
        self.changed.notify_all();
        Ok(task_id)
    }

    /// Claim the best available PENDING task of `task_type`, marking it RUNNING.
    pub fn dequeue(&self, task_type: TaskType) -> Option<Task> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut deferred = Vec::new();
        let mut claimed = None;

        while let Some(entry) = state.heap.pop() {
            if state.statuses.get(&entry.task_id) != Some(&TaskStatus::Pending) {
                // Cancelled, purged, or otherwise no longer waiting.
                continue;
            }
            if entry.available_at > now || entry.task_type != task_type {
                deferred.push(entry);
                continue;
            }
            claimed = Some(entry.task_id);
            break;
        }
        state.heap.extend(deferred);

        let task_id = claimed?;
        let task = state.tasks.get_mut(&task_id)?;
        task.started_at = Some(now);
        let task = task.clone();
        state.statuses.insert(task_id, TaskStatus::Running);
        debug!(task_id = %task.id, task_type = %task_type, "task dequeued");
        self.changed.notify_all();
        Some(task)
    }

    /// Mark a task COMPLETED and store its result.
    pub fn complete(&self, task_id: &TaskId, result: TaskResult) -> Result<()> {
        let mut state = self.lock();
        state.finish(task_id, TaskStatus::Completed, Some(result))?;
        info!(task_id = %task_id, "task completed");
        self.changed.notify_all();
        Ok(())
    }

    /// Record a failure. Retries with exponential backoff while retries remain,
    /// otherwise the task becomes FAILED.
    pub fn fail(&self, task_id: &TaskId, error_message: &str, result: Option<TaskResult>) -> Result<()> {
        let mut state = self.lock();
        let task = state.task_mut(task_id)?;

        if task.can_retry() {
            task.retry_count += 1;
            task.started_at = None;
            let retry_count = task.retry_count;
            let delay = retry_delay(retry_count);
            let task = task.clone();
            state.push(&task, available_after(Utc::now(), delay));
            warn!(
                task_id = %task_id,
                retry_count,
                max_retries = task.max_retries,
                delay_secs = delay.as_secs(),
                error = error_message,
                "task failed, retrying"
            );
        } else {
            state.finish(task_id, TaskStatus::Failed, result)?;
            warn!(task_id = %task_id, error = error_message, "task failed permanently");
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Terminal bookkeeping for a running task whose executor honoured a cancellation.
    pub fn record_cancelled(&self, task_id: &TaskId, result: TaskResult) -> Result<()> {
        let mut state = self.lock();
        state.finish(task_id, TaskStatus::Cancelled, Some(result))?;
        info!(task_id = %task_id, "task cancelled while running");
        self.changed.notify_all();
        Ok(())
    }

    /// Cancel a PENDING task. Returns false for unknown or non-pending tasks;
    /// running tasks are cancelled through their executor.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let mut state = self.lock();
        if state.statuses.get(task_id) != Some(&TaskStatus::Pending) {
            return false;
        }
        if state.finish(task_id, TaskStatus::Cancelled, None).is_err() {
            return false;
        }
        info!(task_id = %task_id, "task cancelled");
        self.changed.notify_all();
        true
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn get_result(&self, task_id: &TaskId) -> Option<TaskResult> {
        self.lock().results.get(task_id).cloned()
    }

    pub fn get_task_status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.lock().statuses.get(task_id).copied()
    }

    /// Matching tasks, newest first, paginated.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.lock();
        let mut tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| {
                state
                    .statuses
                    .get(&task.id)
                    .is_some_and(|status| filter.matches(task, *status))
            })
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
        tasks
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .cloned()
            .collect()
    }

    pub fn get_pending_count(&self, task_type: Option<TaskType>) -> usize {
        self.lock().count(TaskStatus::Pending, task_type)
    }

    pub fn get_running_count(&self, task_type: Option<TaskType>) -> usize {
        self.lock().count(TaskStatus::Running, task_type)
    }

    /// Purge terminal tasks finished before `now - older_than` (all terminal
    /// tasks when `None`). Returns how many were removed.
    pub fn clear_completed(&self, older_than: Option<Duration>) -> usize {
        let mut state = self.lock();
        let cutoff = older_than
            .and_then(|age| TimeDelta::from_std(age).ok())
            .map(|age| Utc::now() - age);

        let purge: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|task| state.statuses.get(&task.id).is_some_and(|s| s.is_terminal()))
            .filter(|task| {
                cutoff.is_none_or(|cutoff| task.completed_at.unwrap_or(task.created_at) < cutoff)
            })
            .map(|task| task.id.clone())
            .collect();

        for task_id in &purge {
            state.tasks.remove(task_id);
            state.statuses.remove(task_id);
            state.results.remove(task_id);
        }
        if !purge.is_empty() {
            debug!(count = purge.len(), "cleared finished tasks");
            self.changed.notify_all();
        }
        purge.len()
    }

    /// Block until the task is terminal or `timeout` elapses. Returns the
    /// terminal status, or `None` on timeout or for unknown tasks.
    pub fn wait_for_terminal(&self, task_id: &TaskId, timeout: Duration) -> Option<TaskStatus> {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| {
                state.statuses.get(task_id).is_some_and(|s| !s.is_terminal())
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.statuses.get(task_id).copied().filter(TaskStatus::is_terminal)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TaskQueue")
            .field("tasks", &state.tasks.len())
            .field("heap", &state.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{completed_result, ingestion_task, publishing_task};
    use std::sync::Arc;
    use std::thread;

    fn queue_with(tasks: Vec<Task>) -> TaskQueue {
        let queue = TaskQueue::new();
        for task in tasks {
            queue.enqueue(task, Duration::ZERO).unwrap();
        }
        queue
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let low = ingestion_task("kb1").with_priority(1);
        let high = ingestion_task("kb1").with_priority(10);
        let mid = ingestion_task("kb1").with_priority(5);
        let ids = [high.id.clone(), mid.id.clone(), low.id.clone()];
        let queue = queue_with(vec![low, high, mid]);

        for expected in ids {
            let task = queue.dequeue(TaskType::Ingestion).expect("task");
            assert_eq!(task.id, expected);
        }
        assert!(queue.dequeue(TaskType::Ingestion).is_none());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let first = ingestion_task("kb1");
        let second = ingestion_task("kb1");
        let (a, b) = (first.id.clone(), second.id.clone());
        let queue = queue_with(vec![first, second]);
        assert_eq!(queue.dequeue(TaskType::Ingestion).unwrap().id, a);
        assert_eq!(queue.dequeue(TaskType::Ingestion).unwrap().id, b);
    }

    #[test]
    fn delayed_task_is_listed_but_not_dequeued() {
        let queue = TaskQueue::new();
        let task = ingestion_task("kb1");
        let id = queue.enqueue(task, Duration::from_secs(3600)).unwrap();

        assert!(queue.dequeue(TaskType::Ingestion).is_none());
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Pending));
        assert_eq!(queue.list_tasks(&TaskFilter::default()).len(), 1);
        assert_eq!(queue.get_pending_count(None), 1);
    }

    #[test]
    fn short_delay_becomes_available() {
        let queue = TaskQueue::new();
        let id = queue
            .enqueue(ingestion_task("kb1"), Duration::from_millis(50))
            .unwrap();
        assert!(queue.dequeue(TaskType::Ingestion).is_none());
        thread::sleep(Duration::from_millis(80));
        assert_eq!(queue.dequeue(TaskType::Ingestion).unwrap().id, id);
    }

    #[test]
    fn dequeue_is_isolated_by_type() {
        let ingest = ingestion_task("kb1").with_priority(100);
        let publish = publishing_task("prod", "docs");
        let publish_id = publish.id.clone();
        let queue = queue_with(vec![ingest, publish]);

        assert!(queue.dequeue(TaskType::Indexing).is_none());
        let task = queue.dequeue(TaskType::Publishing).expect("publishing task");
        assert_eq!(task.id, publish_id);
        assert_eq!(queue.get_task_status(&publish_id), Some(TaskStatus::Running));
        assert!(task.started_at.is_some());
        assert_eq!(queue.get_pending_count(Some(TaskType::Ingestion)), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let task = ingestion_task("kb1");
        let queue = queue_with(vec![task.clone()]);
        let err = queue.enqueue(task, Duration::ZERO).unwrap_err();
        assert!(matches!(err, KbForgeError::Duplicate { .. }));
    }

    #[test]
    fn retries_then_fails_permanently() {
        let task = ingestion_task("kb1").with_max_retries(2);
        let id = task.id.clone();
        let queue = queue_with(vec![task]);

        queue.dequeue(TaskType::Ingestion).unwrap();
        queue.fail(&id, "boom", None).unwrap();
        let retried = queue.get_task(&id).unwrap();
        assert_eq!(retried.retry_count, 1);
        assert!(retried.started_at.is_none());
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Pending));

        queue.fail(&id, "boom", None).unwrap();
        assert_eq!(queue.get_task(&id).unwrap().retry_count, 2);
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Pending));

        queue.fail(&id, "boom", None).unwrap();
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Failed));
        assert!(queue.get_task(&id).unwrap().completed_at.is_some());
    }

    #[test]
    fn zero_retries_fails_immediately_and_stores_result() {
        let task = ingestion_task("kb1").with_max_retries(0);
        let id = task.id.clone();
        let queue = queue_with(vec![task.clone()]);
        queue.dequeue(TaskType::Ingestion).unwrap();

        let result = completed_result(&task);
        queue.fail(&id, "boom", Some(result)).unwrap();
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Failed));
        assert!(queue.get_result(&id).is_some());
    }

    #[test]
    fn retry_waits_for_backoff() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
        assert_eq!(retry_delay(3), Duration::from_secs(8));

        let task = ingestion_task("kb1").with_max_retries(3);
        let id = task.id.clone();
        let queue = queue_with(vec![task]);
        queue.dequeue(TaskType::Ingestion).unwrap();
        queue.fail(&id, "transient", None).unwrap();

        // Requeued with a 2s backoff, so not immediately available.
        assert!(queue.dequeue(TaskType::Ingestion).is_none());
        assert_eq!(queue.get_pending_count(Some(TaskType::Ingestion)), 1);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_delay(12), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(63), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_DELAY);

        let task = ingestion_task("kb1").with_max_retries(1000);
        let id = task.id.clone();
        let queue = queue_with(vec![task]);
        for _ in 0..100 {
            queue.fail(&id, "still broken", None).unwrap();
        }
        let task = queue.get_task(&id).unwrap();
        assert_eq!(task.retry_count, 100);
        assert_eq!(queue.get_task_status(&id), Some(TaskStatus::Pending));
    }

    #[test]
    fn huge_enqueue_delay_is_rejected() {
        let queue = TaskQueue::new();
        let err = queue.enqueue(ingestion_task("kb1"), Duration::MAX).unwrap_err();
        assert!(err.to_string().contains("delay out of range"));
        assert_eq!(queue.get_pending_count(None), 0);
    }

    #[test]
    fn cancel_only_affects_pending() {
        let pending = ingestion_task("kb1");
        let running = ingestion_task("kb1").with_priority(5);
        let (pending_id, running_id) = (pending.id.clone(), running.id.clone());
        let queue = queue_with(vec![pending, running]);
        assert_eq!(queue.dequeue(TaskType::Ingestion).unwrap().id, running_id);

        assert!(!queue.cancel(&running_id));
        assert_eq!(queue.get_task_status(&running_id), Some(TaskStatus::Running));

        assert!(queue.cancel(&pending_id));
        assert_eq!(queue.get_task_status(&pending_id), Some(TaskStatus::Cancelled));
        assert!(queue.get_task(&pending_id).unwrap().completed_at.is_some());
        assert!(!queue.cancel(&pending_id), "already terminal");
        assert!(queue.dequeue(TaskType::Ingestion).is_none());
        assert!(!queue.cancel(&TaskId::from("unknown")));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let queue = TaskQueue::new();
        let task = ingestion_task("kb1");
        let err = queue.complete(&task.id, completed_result(&task)).unwrap_err();
        assert!(matches!(err, KbForgeError::NotFound { .. }));
        assert!(queue.fail(&task.id, "x", None).is_err());
        assert!(queue.get_task_status(&task.id).is_none());
    }

    #[test]
    fn list_filters_sorts_and_paginates() {
        let queue = TaskQueue::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut task = ingestion_task(if i % 2 == 0 { "kb-even" } else { "kb-odd" });
            task.created_at += TimeDelta::seconds(i);
            ids.push(queue.enqueue(task, Duration::ZERO).unwrap());
        }
        queue.enqueue(publishing_task("prod", "docs"), Duration::ZERO).unwrap();

        let all = queue.list_tasks(&TaskFilter::default().with_type(TaskType::Ingestion));
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].id, ids[4], "newest first");

        let even = queue.list_tasks(&TaskFilter::default().with_knowledge_base("kb-even"));
        assert_eq!(even.len(), 3);

        let page = queue.list_tasks(&TaskFilter::default().with_type(TaskType::Ingestion).page(1, 2));
        assert_eq!(page.iter().map(|t| t.id.clone()).collect::<Vec<_>>(), vec![
            ids[3].clone(),
            ids[2].clone()
        ]);

        queue.cancel(&ids[0]);
        let cancelled = queue.list_tasks(&TaskFilter::default().with_status(TaskStatus::Cancelled));
        assert_eq!(cancelled.len(), 1);
    }

    #[test]
    fn counts_track_state() {
        let queue = queue_with(vec![ingestion_task("kb1"), ingestion_task("kb1"), publishing_task("e", "a")]);
        assert_eq!(queue.get_pending_count(None), 3);
        queue.dequeue(TaskType::Ingestion).unwrap();
        assert_eq!(queue.get_pending_count(Some(TaskType::Ingestion)), 1);
        assert_eq!(queue.get_running_count(Some(TaskType::Ingestion)), 1);
        assert_eq!(queue.get_running_count(Some(TaskType::Publishing)), 0);
    }

    #[test]
    fn clear_completed_removes_terminal_tasks() {
        let done = ingestion_task("kb1");
        let waiting = ingestion_task("kb1");
        let (done_id, waiting_id) = (done.id.clone(), waiting.id.clone());
        let queue = queue_with(vec![done.clone(), waiting]);
        queue.dequeue(TaskType::Ingestion).unwrap();
        queue.complete(&done_id, completed_result(&done)).unwrap();

        assert_eq!(queue.clear_completed(Some(Duration::from_secs(3600))), 0);
        assert_eq!(queue.clear_completed(None), 1);
        assert!(queue.get_task(&done_id).is_none());
        assert!(queue.get_result(&done_id).is_none());
        assert!(queue.get_task(&waiting_id).is_some());
    }

    #[test]
    fn wait_for_terminal_wakes_on_completion() {
        let task = ingestion_task("kb1");
        let id = task.id.clone();
        let queue = Arc::new(queue_with(vec![task.clone()]));

        let worker = {
            let queue = queue.clone();
            thread::spawn(move || {
                let task = queue.dequeue(TaskType::Ingestion).unwrap();
                thread::sleep(Duration::from_millis(30));
                queue.complete(&task.id, completed_result(&task)).unwrap();
            })
        };

        let status = queue.wait_for_terminal(&id, Duration::from_secs(5));
        worker.join().unwrap();
        assert_eq!(status, Some(TaskStatus::Completed));
        assert_eq!(queue.wait_for_terminal(&TaskId::from("nope"), Duration::from_millis(10)), None);
    }

    #[test]
    fn wait_for_terminal_times_out() {
        let task = ingestion_task("kb1");
        let id = task.id.clone();
        let queue = queue_with(vec![task]);
        assert_eq!(queue.wait_for_terminal(&id, Duration::from_millis(20)), None);
    }
}
