use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::executor::{HandleState, TaskHandle};
use crate::task::{Task, TaskId, TaskPriority, TaskStatus};

/// A task paired with its priority and, once submitted, its execution handle.
///
/// The priority is captured at construction and never changes afterwards.
pub struct WrappedTask {
    task: Arc<dyn Task>,
    priority: TaskPriority,
    handle: Mutex<Option<TaskHandle>>,
    submitted_at: DateTime<Utc>,
    run_time: Mutex<Option<Duration>>,
}

impl WrappedTask {
    /// Wrap `task` with its own priority.
    pub fn new(task: Arc<dyn Task>) -> Self {
        let priority = task.priority();
        Self::with_priority(task, priority)
    }

    /// Wrap `task`, overriding the priority it reports.
    pub fn with_priority(task: Arc<dyn Task>, priority: TaskPriority) -> Self {
        Self {
            task,
            priority,
            handle: Mutex::new(None),
            submitted_at: Utc::now(),
            run_time: Mutex::new(None),
        }
    }

    /// The wrapped domain task.
    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.core().id()
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    pub fn description(&self) -> String {
        self.task.description()
    }

    pub fn finished_percentage(&self) -> f64 {
        self.task.finished_percentage()
    }

    pub fn error_message(&self) -> Option<String> {
        self.task.error_message()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Wall-clock time spent in `run()`, once it has returned.
    pub fn run_time(&self) -> Option<Duration> {
        *self.run_time.lock()
    }

    /// Record the handle returned by the executor. Only the first call wins.
    ///
    /// If the task was canceled before the handle arrived, the handle is
    /// canceled right away so the queued job never starts.
    pub fn set_handle(&self, handle: TaskHandle) -> bool {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return false;
        }
        if self.task.is_canceled() {
            handle.cancel();
        }
        *slot = Some(handle);
        true
    }

    pub fn handle(&self) -> Option<TaskHandle> {
        self.handle.lock().clone()
    }

    /// Cancel the task and, if it has not started yet, its queued job.
    ///
    /// A running task is only asked to stop; its worker thread is never interrupted.
    pub fn cancel(&self) {
        self.task.cancel();
        if let Some(handle) = self.handle() {
            handle.cancel();
        }
    }

    /// Run the task on the current thread, mapping its outcome onto its status.
    ///
    /// Failures and panics end in `Error` with the message retained on the
    /// task; nothing propagates to the calling worker thread.
    pub fn execute(&self) -> TaskStatus {
        let task = &self.task;
        if !task.set_status(TaskStatus::Processing) {
            debug!(task = %self.id(), status = %task.status(), "skipping task that cannot start");
            return task.status();
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()));
        *self.run_time.lock() = Some(started.elapsed());

        match outcome {
            Ok(Ok(())) => {
                task.set_status(TaskStatus::Finished);
            }
            Ok(Err(TaskError::Canceled)) => task.cancel(),
            Ok(Err(e)) => {
                warn!(task = %self.id(), description = %task.description(), error = %e, "task failed");
                task.core().error(e.to_string());
            }
            Err(payload) => {
                let e = TaskError::Panicked(panic_message(payload.as_ref()));
                warn!(task = %self.id(), description = %task.description(), error = %e, "task panicked");
                task.core().error(e.to_string());
            }
        }
        task.status()
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id(),
            description: self.description(),
            status: self.status(),
            priority: self.priority,
            progress: self.finished_percentage(),
            submitted_at: self.submitted_at,
            handle: self.handle().map(|h| h.state()),
            error_message: self.error_message(),
        }
    }
}

impl fmt::Debug for WrappedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedTask")
            .field("id", &self.id())
            .field("description", &self.description())
            .field("status", &self.status())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Serializable view of a tracked task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: f64,
    pub submitted_at: DateTime<Utc>,
    pub handle: Option<HandleState>,
    pub error_message: Option<String>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
