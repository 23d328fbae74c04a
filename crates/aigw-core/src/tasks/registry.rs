//! Task lifecycle and listener fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use super::event::{TaskEvent, TaskSnapshot, TaskStatus};

type TaskMap = Mutex<HashMap<String, Arc<Task>>>;

struct TaskState {
    status: TaskStatus,
    ok: u64,
    fail: u64,
    final_event: Option<TaskEvent>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<TaskEvent>>,
    next_subscriber: u64,
}

/// A trackable background job.
///
/// Counters and state live behind one mutex so snapshots are consistent.
/// No lock is held while the owning job does I/O.
pub struct Task {
    id: String,
    total: u64,
    created_at: DateTime<Utc>,
    cancel_requested: AtomicBool,
    state: Mutex<TaskState>,
    registry: Weak<TaskMap>,
    retention: Duration,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("total", &self.total)
            .field("cancel_requested", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

/// A listener's delivery channel. Dropping it detaches the listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<TaskEvent>,
    task: Weak<Task>,
}

impl Subscription {
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the task has dropped this listener.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.upgrade() {
            task.detach(self.id);
        }
    }
}

impl Task {
    fn new(total: u64, registry: Weak<TaskMap>, retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            total,
            created_at: Utc::now(),
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(TaskState {
                status: TaskStatus::Running,
                ok: 0,
                fail: 0,
                final_event: None,
                subscribers: HashMap::new(),
                next_subscriber: 0,
            }),
            registry,
            retention,
        })
    }

    /// A task no registry tracks, for batch work awaited on the request
    /// path. Nothing can look it up, cancel it or stream it.
    pub fn standalone(total: u64) -> Arc<Self> {
        Self::new(total, Weak::new(), Duration::ZERO)
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn total(&self) -> u64 {
        self.total
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    /// Register a new listener.
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(id, tx);
        Subscription {
            id,
            receiver: rx,
            task: Arc::downgrade(self),
        }
    }

    /// Unregister a listener. Unknown ids are ignored.
    pub fn detach(&self, subscriber: u64) {
        self.lock().subscribers.remove(&subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Count one processed item. Ignored once `total` items are counted or
    /// the task has ended.
    pub fn record(&self, ok: bool) {
        let mut state = self.lock();
        if state.status.is_terminal() || state.ok + state.fail >= self.total {
            return;
        }
        if ok {
            state.ok += 1;
        } else {
            state.fail += 1;
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        Self::snapshot_of(&self.id, self.total, &self.lock())
    }

    fn snapshot_of(id: &str, total: u64, state: &TaskState) -> TaskSnapshot {
        TaskSnapshot {
            task_id: id.to_string(),
            status: state.status,
            total,
            processed: state.ok + state.fail,
            ok: state.ok,
            fail: state.fail,
        }
    }

    /// Broadcast the current counters as a `progress` event.
    pub fn publish_progress(&self) {
        let mut state = self.lock();
        let event = TaskEvent::Progress(Self::snapshot_of(&self.id, self.total, &state));
        Self::broadcast(&mut state, &event);
    }

    fn broadcast(state: &mut TaskState, event: &TaskEvent) {
        state
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Move to a terminal state and broadcast `event`, once.
    fn terminate(&self, status: TaskStatus, event: TaskEvent) -> bool {
        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            Self::broadcast(&mut state, &event);
            state.final_event = Some(event);
        }
        tracing::info!(task_id = %self.id, ?status, "Task finished");
        self.schedule_expiry(self.retention);
        true
    }

    /// `running -> done` with the job result.
    pub fn finish(&self, result: Value, warning: Option<String>) -> bool {
        let event = TaskEvent::Done {
            task_id: self.id.clone(),
            result,
            warning,
        };
        self.terminate(TaskStatus::Done, event)
    }

    /// `running -> cancelled`, only if cancellation was requested.
    pub fn finish_cancelled(&self) -> bool {
        if !self.is_cancel_requested() {
            return false;
        }
        let event = TaskEvent::Cancelled {
            task_id: self.id.clone(),
        };
        self.terminate(TaskStatus::Cancelled, event)
    }

    /// `running -> error` with a message.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let event = TaskEvent::Error {
            task_id: self.id.clone(),
            error: message.into(),
        };
        self.terminate(TaskStatus::Error, event)
    }

    /// Request cooperative cancellation. State is unchanged until the job
    /// calls [`Task::finish_cancelled`].
    pub fn cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            tracing::info!(task_id = %self.id, "Task cancellation requested");
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// The terminal event, if the task has ended.
    pub fn final_event(&self) -> Option<TaskEvent> {
        self.lock().final_event.clone()
    }

    /// Remove this task from its registry after `after`.
    pub fn schedule_expiry(&self, after: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(task_id = %self.id, "No runtime, task expiry not scheduled");
            return;
        };
        let registry = self.registry.clone();
        let id = self.id.clone();
        handle.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tasks) = registry.upgrade()
                && tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id)
                    .is_some()
            {
                tracing::debug!(task_id = %id, "Task expired");
            }
        });
    }
}

/// Process-wide registry of tasks, cheap to clone.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<TaskMap>,
    retention: Duration,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl TaskRegistry {
    /// Registry whose finished tasks stay queryable for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Task>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a running task expecting `total` items.
    pub fn create(&self, total: u64) -> Arc<Task> {
        let task = Task::new(total, Arc::downgrade(&self.tasks), self.retention);
        self.map().insert(task.id.clone(), Arc::clone(&task));
        tracing::info!(task_id = %task.id, total, "Task created");
        task
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<Task>> {
        self.map().get(task_id).cloned()
    }

    /// Schedule removal of a task. Unknown ids are ignored.
    pub fn expire(&self, task_id: &str, after: Duration) {
        if let Some(task) = self.get(task_id) {
            task.schedule_expiry(after);
        }
    }

    /// Request cancellation of a task. Returns false for unknown ids.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.get(task_id).is_some_and(|task| {
            task.cancel();
            true
        })
    }

    /// Request cancellation of every running task.
    pub fn cancel_all(&self) -> usize {
        let running: Vec<Arc<Task>> = self
            .map()
            .values()
            .filter(|t| !t.status().is_terminal())
            .cloned()
            .collect();
        for task in &running {
            task.cancel();
        }
        running.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
