//! One-shot callbacks fired when every task of a group has reached a terminal state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::task::{Task, TaskStatus};

type Callback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Box<dyn FnOnce(String) + Send>;

/// Builder for a group listener.
///
/// Exactly one callback fires, once, after the last task settles:
/// `on_error` with the first error message if any task failed, otherwise
/// `on_cancel` if any was canceled, otherwise `on_finish`.
///
/// ```ignore
/// AllTasksFinished::new()
///     .on_finish(|| info!("all done"))
///     .on_error(|message| warn!(%message, "group failed"))
///     .register(&tasks);
/// ```
pub struct AllTasksFinished {
    cancel_on_error: bool,
    on_finish: Option<Callback>,
    on_error: Option<ErrorCallback>,
    on_cancel: Option<Callback>,
}

impl Default for AllTasksFinished {
    fn default() -> Self {
        Self::new()
    }
}

impl AllTasksFinished {
    /// A listener with no callbacks that cancels the group on the first error.
    pub fn new() -> Self {
        Self { cancel_on_error: true, on_finish: None, on_error: None, on_cancel: None }
    }

    /// Whether the first failing task cancels the others. Defaults to `true`.
    pub fn cancel_on_error(mut self, cancel: bool) -> Self {
        self.cancel_on_error = cancel;
        self
    }

    pub fn on_finish(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_cancel(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(callback));
        self
    }

    /// Attach to `tasks`. Tasks that are already terminal count immediately,
    /// and an empty group fires `on_finish` before this returns.
    pub fn register(self, tasks: &[Arc<dyn Task>]) {
        let group = Arc::new(Group {
            remaining: AtomicUsize::new(tasks.len()),
            counted: tasks.iter().map(|_| AtomicBool::new(false)).collect(),
            errors: AtomicUsize::new(0),
            canceled: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            members: tasks.iter().map(Arc::downgrade).collect(),
            cancel_on_error: self.cancel_on_error,
            callbacks: Mutex::new(Some(Callbacks {
                on_finish: self.on_finish,
                on_error: self.on_error,
                on_cancel: self.on_cancel,
            })),
        });

        if tasks.is_empty() {
            group.fire();
            return;
        }

        for (index, task) in tasks.iter().enumerate() {
            let listener = Arc::clone(&group);
            task.core().add_status_listener(move |_, new, core| {
                if new.is_terminal() {
                    listener.settle(index, new, core.error_message());
                }
            });
        }

        // Catch tasks that went terminal before their listener was attached.
        for (index, task) in tasks.iter().enumerate() {
            let status = task.status();
            if status.is_terminal() {
                group.settle(index, status, task.error_message());
            }
        }
    }
}

struct Callbacks {
    on_finish: Option<Callback>,
    on_error: Option<ErrorCallback>,
    on_cancel: Option<Callback>,
}

/// Shared state of one registration. Holds tasks weakly: the tasks own the
/// listeners that own this.
struct Group {
    remaining: AtomicUsize,
    counted: Vec<AtomicBool>,
    errors: AtomicUsize,
    canceled: AtomicUsize,
    first_error: Mutex<Option<String>>,
    members: Vec<Weak<dyn Task>>,
    cancel_on_error: bool,
    callbacks: Mutex<Option<Callbacks>>,
}

impl Group {
    fn settle(&self, index: usize, status: TaskStatus, message: Option<String>) {
        if self.counted[index].swap(true, Ordering::SeqCst) {
            return;
        }

        match status {
            TaskStatus::Error => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                self.first_error
                    .lock()
                    .get_or_insert_with(|| message.unwrap_or_else(|| "task failed".to_string()));
                if self.cancel_on_error {
                    self.cancel_members();
                }
            }
            TaskStatus::Canceled => {
                self.canceled.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.fire();
        }
    }

    fn cancel_members(&self) {
        for task in self.members.iter().filter_map(Weak::upgrade) {
            if !task.status().is_terminal() {
                debug!(task = %task.core().id(), "canceling task after a sibling failed");
                task.cancel();
            }
        }
    }

    fn fire(&self) {
        let Some(callbacks) = self.callbacks.lock().take() else {
            return;
        };
        let errors = self.errors.load(Ordering::SeqCst);
        let canceled = self.canceled.load(Ordering::SeqCst);
        debug!(tasks = self.members.len(), errors, canceled, "all tasks finished");

        if errors > 0 {
            let message = self.first_error.lock().take().unwrap_or_default();
            if let Some(on_error) = callbacks.on_error {
                on_error(message);
            }
        } else if canceled > 0 {
            if let Some(on_cancel) = callbacks.on_cancel {
                on_cancel();
            }
        } else if let Some(on_finish) = callbacks.on_finish {
            on_finish();
        }
    }
}
