//! Composite task that runs a batch of sub-tasks on a worker pool.
//!
//! A [`ThreadPoolTask`] is itself a [`Task`], so batches nest and can be
//! submitted like any other task. Its `run()` fans the sub-tasks out,
//! blocks until every one of them is terminal (or the batch is canceled),
//! and reports `finished / total` as its progress.

mod source;
#[cfg(test)]
mod tests;

pub use source::PoolSource;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::controller::TaskController;
use crate::error::{SchedulerError, TaskError};
use crate::executor::Executor;
use crate::task::{Task, TaskCore, TaskPriority, TaskStatus};
use crate::wrapped::WrappedTask;

/// Wakes a batch blocked in `await_completion`.
#[derive(Default)]
struct Wakeup {
    lock: Mutex<()>,
    signal: Condvar,
}

impl Wakeup {
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.signal.notify_all();
    }
}

/// A batch of independent tasks that behaves like a single task.
pub struct ThreadPoolTask {
    core: TaskCore,
    description: String,
    source: PoolSource,
    controller: Arc<TaskController>,
    tasks: Vec<Arc<WrappedTask>>,
    finished: Arc<AtomicUsize>,
    priority: TaskPriority,
    wakeup: Arc<Wakeup>,
}

impl ThreadPoolTask {
    /// Build a batch over `tasks`, drawing its executor from `source`.
    pub fn new(
        controller: Arc<TaskController>,
        description: impl Into<String>,
        source: PoolSource,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Result<Self, SchedulerError> {
        source.validate()?;
        Ok(Self::assemble(controller, description.into(), source, tasks))
    }

    /// Build a batch from a source that is known to be valid.
    fn assemble(
        controller: Arc<TaskController>,
        description: String,
        source: PoolSource,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Self {
        let wakeup = Arc::new(Wakeup::default());
        let priority = tasks.first().map(|t| t.priority()).unwrap_or_default();
        let tasks: Vec<Arc<WrappedTask>> = tasks
            .into_iter()
            .map(|task| {
                let notify = Arc::clone(&wakeup);
                task.core().add_status_listener(move |_, new, _| {
                    if new.is_terminal() {
                        notify.notify();
                    }
                });
                Arc::new(WrappedTask::new(task))
            })
            .collect();

        Self {
            core: TaskCore::new(),
            description,
            source,
            controller,
            tasks,
            finished: Arc::new(AtomicUsize::new(0)),
            priority,
            wakeup,
        }
    }

    /// Batch on a private pool of `threads` workers.
    pub fn fixed(
        controller: Arc<TaskController>,
        description: impl Into<String>,
        threads: usize,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Result<Self, SchedulerError> {
        Self::new(controller, description, PoolSource::Fixed { threads }, tasks)
    }

    /// Batch on an existing pool, shut down afterwards only if `auto_shutdown`.
    pub fn provided(
        controller: Arc<TaskController>,
        description: impl Into<String>,
        executor: Arc<Executor>,
        auto_shutdown: bool,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Self {
        let source = PoolSource::Provided { executor, auto_shutdown };
        Self::assemble(controller, description.into(), source, tasks)
    }

    /// Batch where every sub-task gets its own thread; suited to blocking I/O.
    pub fn virtual_threads(
        controller: Arc<TaskController>,
        description: impl Into<String>,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Self {
        Self::assemble(controller, description.into(), PoolSource::Virtual, tasks)
    }

    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Sub-tasks whose wrapper has returned, whatever their outcome.
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn sub_tasks(&self) -> &[Arc<WrappedTask>] {
        &self.tasks
    }

    pub fn source(&self) -> &PoolSource {
        &self.source
    }

    /// Prefix for the threads of a private pool: `batch-` plus the first
    /// eight hex digits of the batch id.
    pub fn pool_label(&self) -> String {
        let id = self.core.id().simple().to_string();
        format!("batch-{}", &id[..8])
    }

    fn cancel_sub_tasks(&self) {
        for wrapped in &self.tasks {
            wrapped.cancel();
        }
    }

    /// Submit every sub-task in list order. HIGH sub-tasks bypass the batch pool.
    fn dispatch(&self, pool: &Arc<Executor>) {
        for wrapped in &self.tasks {
            if self.core.is_terminal() {
                break;
            }

            let executor = if wrapped.task().blocks_on_sub_tasks() {
                self.controller.batch_executor()
            } else {
                match wrapped.priority() {
                    TaskPriority::High => self.controller.high_priority_executor(),
                    TaskPriority::Normal => pool,
                }
            };

            let job = Arc::clone(wrapped);
            let controller = Arc::clone(&self.controller);
            let finished = Arc::clone(&self.finished);
            let wakeup = Arc::clone(&self.wakeup);
            let submitted = executor.submit(move || {
                controller.execute_tracked(&job);
                finished.fetch_add(1, Ordering::SeqCst);
                wakeup.notify();
            });

            match submitted {
                Ok(handle) => {
                    wrapped.set_handle(handle);
                    self.controller.add_submitted_task_to_view(Arc::clone(wrapped));
                    debug!(
                        batch = %self.description,
                        task = %wrapped.id(),
                        executor = %executor.name(),
                        "sub-task dispatched"
                    );
                }
                Err(e) => {
                    warn!(
                        batch = %self.description,
                        task = %wrapped.id(),
                        error = %e,
                        "sub-task rejected, canceling it"
                    );
                    self.controller.record_rejection();
                    wrapped.cancel();
                }
            }
        }
    }

    /// Block until every sub-task is terminal or the batch itself is.
    fn await_completion(&self) {
        let poll = self.controller.config().batch_poll_interval();
        let mut guard = self.wakeup.lock.lock();
        loop {
            if self.core.is_terminal() {
                return;
            }
            if self.tasks.iter().all(|t| t.status().is_terminal()) {
                return;
            }
            self.wakeup.signal.wait_for(&mut guard, poll);
        }
    }

    fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }
}

impl Task for ThreadPoolTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn finished_percentage(&self) -> f64 {
        let total = self.tasks.len();
        if total == 0 || self.core.is_terminal() {
            return 1.0;
        }
        (self.finished_count() as f64 / total as f64).min(1.0)
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn blocks_on_sub_tasks(&self) -> bool {
        true
    }

    fn cancel(&self) {
        self.core.cancel();
        self.cancel_sub_tasks();
        self.wakeup.notify();
    }

    fn run(&self) -> Result<(), TaskError> {
        if self.core.is_terminal() {
            // Canceled before it started: nothing may run.
            self.cancel_sub_tasks();
            return Ok(());
        }
        self.core.set_status(TaskStatus::Processing);

        if self.tasks.is_empty() {
            debug!(batch = %self.description, "empty batch, nothing to dispatch");
            self.core.set_status(TaskStatus::Finished);
            return Ok(());
        }

        let pool = match self.source.create_thread_pool(&self.controller, &self.pool_label()) {
            Ok(pool) => pool,
            Err(e) => {
                self.cancel_sub_tasks();
                return Err(TaskError::failed(format!("could not create thread pool: {e}")));
            }
        };
        let workers = pool
            .core_pool_size()
            .unwrap_or_else(|| self.controller.number_of_threads());

        info!(
            batch = %self.description,
            tasks = self.tasks.len(),
            workers,
            executor = %pool.name(),
            "starting thread pool task"
        );

        self.dispatch(&pool);

        // An owned pool only has to stop taking work; queued sub-tasks still drain.
        if self.source.owns_pool() {
            pool.shutdown();
        }

        self.await_completion();

        if self.core.is_terminal() {
            self.cancel_sub_tasks();
            info!(
                batch = %self.description,
                status = %self.core.status(),
                finished = self.count_status(TaskStatus::Finished),
                canceled = self.count_status(TaskStatus::Canceled),
                "thread pool task aborted"
            );
            return Ok(());
        }

        self.core.set_status(TaskStatus::Finished);
        info!(
            batch = %self.description,
            finished = self.count_status(TaskStatus::Finished),
            errors = self.count_status(TaskStatus::Error),
            canceled = self.count_status(TaskStatus::Canceled),
            "thread pool task finished"
        );
        Ok(())
    }
}
