//! The unit-of-work contract and its lifecycle model.

mod core;
mod fn_task;
mod priority;
mod status;

pub use self::core::{StatusListener, TaskCore, TaskId};
pub use fn_task::FnTask;
pub use priority::TaskPriority;
pub use status::TaskStatus;

use crate::error::TaskError;

/// A cancellable, progress-reporting unit of work.
///
/// Implementors provide `run()`, a description and progress; status,
/// cancellation and listeners come from the embedded [`TaskCore`].
/// `run()` is invoked at most once, by an executor thread. It should poll
/// [`Task::is_canceled`] and return early once cancellation is requested.
pub trait Task: Send + Sync {
    fn core(&self) -> &TaskCore;

    fn description(&self) -> String;

    /// Progress in `[0, 1]`.
    fn finished_percentage(&self) -> f64;

    fn priority(&self) -> TaskPriority {
        TaskPriority::Normal
    }

    fn run(&self) -> Result<(), TaskError>;

    /// Whether `run()` blocks until other submitted tasks finish.
    ///
    /// Such tasks are kept off the bounded pools: if they filled every
    /// worker, the work they wait on could never start.
    fn blocks_on_sub_tasks(&self) -> bool {
        false
    }

    fn status(&self) -> TaskStatus {
        self.core().status()
    }

    fn set_status(&self, status: TaskStatus) -> bool {
        self.core().set_status(status)
    }

    /// Request cooperative cancellation. Returns before the task necessarily stops.
    fn cancel(&self) {
        self.core().cancel();
    }

    fn is_canceled(&self) -> bool {
        self.core().is_canceled()
    }

    fn error_message(&self) -> Option<String> {
        self.core().error_message()
    }
}
