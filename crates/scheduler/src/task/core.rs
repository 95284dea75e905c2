use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::status::TaskStatus;

/// Unique identifier of a task.
pub type TaskId = Uuid;

/// Callback invoked as `(old_status, new_status, task)` after every transition.
///
/// Listeners run synchronously on whichever thread performed the transition,
/// usually a pool worker. They must return quickly and must not block.
pub type StatusListener = Arc<dyn Fn(TaskStatus, TaskStatus, &TaskCore) + Send + Sync>;

/// Bookkeeping shared by every task: identity, status, error message and listeners.
///
/// Concrete tasks embed a `TaskCore` and hand it out through [`Task::core`](super::Task::core).
/// All methods take `&self` and are safe to call from any thread.
pub struct TaskCore {
    id: TaskId,
    created_at: DateTime<Utc>,
    status: Mutex<TaskStatus>,
    error_message: Mutex<Option<String>>,
    listeners: RwLock<Vec<StatusListener>>,
}

impl TaskCore {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            status: Mutex::new(TaskStatus::Waiting),
            error_message: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    /// Move to `next` and notify listeners in registration order.
    ///
    /// Returns `false` without notifying when the transition is illegal, which
    /// includes every attempt to leave a terminal state.
    pub fn set_status(&self, next: TaskStatus) -> bool {
        self.transition(next, || {})
    }

    /// Register a status-change listener.
    pub fn add_status_listener<F>(&self, listener: F)
    where
        F: Fn(TaskStatus, TaskStatus, &TaskCore) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Request cancellation. Idempotent; a no-op once the task is terminal.
    pub fn cancel(&self) -> bool {
        self.transition(TaskStatus::Canceled, || {})
    }

    /// Record a failure and move to `Error`.
    ///
    /// The message is kept only if the transition succeeds, so a late failure
    /// never overwrites the outcome of a task that already finished or was canceled.
    pub fn error(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(TaskStatus::Error, || {
            *self.error_message.lock() = Some(message);
        })
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().clone()
    }

    fn transition(&self, next: TaskStatus, on_commit: impl FnOnce()) -> bool {
        let old = {
            let mut status = self.status.lock();
            let old = *status;
            if !old.can_transition_to(next) {
                if old != next {
                    debug!(task = %self.id, from = %old, to = %next, "ignored illegal status change");
                }
                return false;
            }
            on_commit();
            *status = next;
            old
        };

        debug!(task = %self.id, from = %old, to = %next, "status changed");

        // Snapshot so listeners may register further listeners without deadlocking.
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(old, next, self);
        }
        true
    }
}

impl Default for TaskCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("error_message", &self.error_message())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
