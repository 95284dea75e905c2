use std::sync::Arc;

use tracing::{debug, warn};

use crate::executor::Executor;
use crate::task::{Task, TaskPriority};
use crate::threadpool::ThreadPoolTask;
use crate::wrapped::WrappedTask;

use super::TaskController;

impl TaskController {
    /// Submit one task to the executor selected by `priority`.
    ///
    /// A task that blocks on sub-tasks, such as a batch, runs on the
    /// on-demand batch pool instead so it never occupies a bounded worker.
    ///
    /// A rejected submission cancels the task instead of failing the caller.
    pub fn add_task(self: &Arc<Self>, task: Arc<dyn Task>, priority: TaskPriority) -> Arc<WrappedTask> {
        let wrapped = Arc::new(WrappedTask::with_priority(task, priority));
        self.submit_wrapped(&wrapped);
        wrapped
    }

    /// Submit several tasks, each with its own priority, in order.
    pub fn add_tasks(self: &Arc<Self>, tasks: Vec<Arc<dyn Task>>) -> Vec<Arc<WrappedTask>> {
        tasks
            .into_iter()
            .map(|task| {
                let priority = task.priority();
                self.add_task(task, priority)
            })
            .collect()
    }

    /// Track `task` and run it to completion on the calling thread.
    ///
    /// Used to drive a batch from an orchestrating thread without occupying a
    /// worker slot of the shared pool.
    pub fn run_task_on_this_thread_blocking(&self, task: Arc<dyn Task>) -> Arc<WrappedTask> {
        let wrapped = Arc::new(WrappedTask::new(task));
        self.add_submitted_task_to_view(Arc::clone(&wrapped));
        let status = self.execute_tracked(&wrapped);
        debug!(task = %wrapped.id(), %status, "blocking task returned");
        wrapped
    }

    /// A batch on the controller's own normal pool, which the batch never shuts down.
    ///
    /// This is the default way to run a batch: it reuses the shared workers
    /// instead of creating and tearing down a private pool per batch.
    pub fn create_default_task_manager_pool(
        self: &Arc<Self>,
        description: impl Into<String>,
        tasks: Vec<Arc<dyn Task>>,
    ) -> ThreadPoolTask {
        ThreadPoolTask::provided(
            Arc::clone(self),
            description,
            self.executor(),
            false,
            tasks,
        )
    }

    /// The executor `wrapped` is admitted to. Tasks that wait on sub-tasks
    /// get the batch pool whatever their priority.
    pub(crate) fn executor_for_task(&self, wrapped: &WrappedTask) -> Arc<Executor> {
        if wrapped.task().blocks_on_sub_tasks() {
            Arc::clone(&self.batch_executor)
        } else {
            self.executor_for(wrapped.priority())
        }
    }

    fn submit_wrapped(self: &Arc<Self>, wrapped: &Arc<WrappedTask>) {
        let executor = self.executor_for_task(wrapped);
        let controller = Arc::clone(self);
        let job = Arc::clone(wrapped);

        match executor.submit(move || {
            controller.execute_tracked(&job);
        }) {
            Ok(handle) => {
                wrapped.set_handle(handle);
                self.add_submitted_task_to_view(Arc::clone(wrapped));
                debug!(
                    task = %wrapped.id(),
                    priority = %wrapped.priority(),
                    executor = %executor.name(),
                    "task submitted"
                );
            }
            Err(e) => {
                warn!(task = %wrapped.id(), error = %e, "task rejected, canceling it");
                self.record_rejection();
                wrapped.cancel();
            }
        }
    }
}
