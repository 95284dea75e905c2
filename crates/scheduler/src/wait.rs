use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::task::{Task, TaskStatus};
use crate::wrapped::WrappedTask;

/// Fold many statuses into the worst one: `Error` beats `Canceled` beats the rest.
///
/// An empty input counts as `Finished`.
pub fn aggregate_status<I>(statuses: I) -> TaskStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    statuses
        .into_iter()
        .max_by_key(|s| s.severity())
        .unwrap_or(TaskStatus::Finished)
}

/// Block until every task in `tasks` has finished, checking every `poll`.
///
/// Stops early on the first sub-task that errors or is canceled, and when
/// `parent` (the task doing the waiting) is canceled. In those cases every
/// task still pending is canceled and the triggering status is returned.
/// Otherwise returns `Finished`.
pub fn wait_for_tasks_to_finish(
    parent: Option<&dyn Task>,
    tasks: &[Arc<WrappedTask>],
    poll: Duration,
) -> TaskStatus {
    loop {
        if parent.is_some_and(|p| p.is_canceled()) {
            debug!(total = tasks.len(), "waiting task canceled, canceling its tasks");
            cancel_pending(tasks);
            return TaskStatus::Canceled;
        }

        let mut pending = 0;
        for task in tasks {
            match task.status() {
                status @ (TaskStatus::Error | TaskStatus::Canceled) => {
                    debug!(task = %task.id(), %status, "stopping wait early");
                    cancel_pending(tasks);
                    return status;
                }
                TaskStatus::Finished => {}
                TaskStatus::Waiting | TaskStatus::Processing => pending += 1,
            }
        }
        if pending == 0 {
            return TaskStatus::Finished;
        }
        debug!(pending, total = tasks.len(), "waiting for tasks to finish");
        thread::sleep(poll);
    }
}

fn cancel_pending(tasks: &[Arc<WrappedTask>]) {
    for task in tasks.iter().filter(|t| !t.status().is_terminal()) {
        task.cancel();
    }
}
