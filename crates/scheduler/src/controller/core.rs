use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use taskpool_core::PoolConfig;
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::executor::{Executor, ExecutorStats};
use crate::metrics::ControllerMetrics;
use crate::task::{TaskId, TaskPriority, TaskStatus};
use crate::wrapped::{TaskInfo, WrappedTask};

/// Registry never prunes below this many entries.
const MIN_PRUNE_THRESHOLD: usize = 64;

/// Submitted tasks in submission order.
///
/// Terminal entries are swept out only once the map has doubled since the
/// last sweep, so registering `n` tasks costs amortized O(n).
pub(super) struct Registry {
    tasks: IndexMap<TaskId, Arc<WrappedTask>>,
    prune_at: usize,
}

impl Registry {
    fn new() -> Self {
        Self { tasks: IndexMap::new(), prune_at: MIN_PRUNE_THRESHOLD }
    }

    fn insert(&mut self, wrapped: Arc<WrappedTask>) {
        if self.tasks.len() >= self.prune_at {
            let before = self.tasks.len();
            self.prune();
            self.prune_at = (self.tasks.len() * 2).max(MIN_PRUNE_THRESHOLD);
            debug!(before, after = self.tasks.len(), next = self.prune_at, "registry swept");
        }
        self.tasks.insert(wrapped.id(), wrapped);
    }

    fn prune(&mut self) {
        self.tasks.retain(|_, t| !t.status().is_terminal());
    }

    fn drain(&mut self) -> Vec<Arc<WrappedTask>> {
        self.prune_at = MIN_PRUNE_THRESHOLD;
        self.tasks.drain(..).map(|(_, t)| t).collect()
    }
}

/// Owner of the shared worker pools and the registry of in-flight tasks.
///
/// Construct one per process (or per test) and pass it around as
/// `Arc<TaskController>`; there is no global instance.
pub struct TaskController {
    pub(super) config: PoolConfig,
    threads: AtomicUsize,
    /// Bounded pool for NORMAL work. Replaced on resize.
    executor: RwLock<Arc<Executor>>,
    /// Pool with zero core threads for HIGH work.
    pub(super) high_priority_executor: Arc<Executor>,
    /// On-demand pool for tasks that block on their own sub-tasks, so they
    /// never hold a slot of the pool their sub-tasks need.
    pub(super) batch_executor: Arc<Executor>,
    pub(super) tracked: RwLock<Registry>,
    pub(super) metrics: RwLock<ControllerMetrics>,
}

impl TaskController {
    /// Create a controller from config. `worker_threads == 0` uses available parallelism.
    pub fn new(config: PoolConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let threads = config.resolved_worker_threads();
        let executor = Executor::bounded("taskpool-worker", threads)?;
        let high_priority_executor =
            Executor::on_demand("taskpool-high", config.high_priority_keep_alive());
        let batch_executor = Executor::on_demand("taskpool-batch", config.high_priority_keep_alive());

        info!(
            threads,
            high_priority_keep_alive = ?config.high_priority_keep_alive(),
            "task controller started"
        );

        Ok(Self {
            config,
            threads: AtomicUsize::new(threads),
            executor: RwLock::new(Arc::new(executor)),
            high_priority_executor: Arc::new(high_priority_executor),
            batch_executor: Arc::new(batch_executor),
            tracked: RwLock::new(Registry::new()),
            metrics: RwLock::new(ControllerMetrics::default()),
        })
    }

    /// Create a controller with exactly `threads` normal-priority workers.
    pub fn with_threads(threads: usize) -> Result<Self, SchedulerError> {
        if threads == 0 {
            return Err(SchedulerError::InvalidThreadCount(threads));
        }
        Self::new(PoolConfig::with_threads(threads))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Size of the normal-priority pool.
    pub fn number_of_threads(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    /// Resize the normal-priority pool.
    ///
    /// New submissions go to a fresh pool of `threads` workers. Work already
    /// handed to the old pool, including batches bound to it, runs to
    /// completion there; its threads exit once that work is done.
    pub fn set_number_of_threads(&self, threads: usize) -> Result<(), SchedulerError> {
        if threads == 0 {
            return Err(SchedulerError::InvalidThreadCount(threads));
        }
        let mut current = self.executor.write();
        if current.is_shutdown() {
            return Err(SchedulerError::Rejected { executor: current.name().to_string() });
        }
        let previous = self.threads.load(Ordering::SeqCst);
        if previous == threads {
            return Ok(());
        }
        *current = Arc::new(Executor::bounded("taskpool-worker", threads)?);
        self.threads.store(threads, Ordering::SeqCst);
        info!(previous, threads, "normal-priority pool resized");
        Ok(())
    }

    /// The current normal-priority pool.
    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&*self.executor.read())
    }

    pub fn high_priority_executor(&self) -> &Arc<Executor> {
        &self.high_priority_executor
    }

    pub fn batch_executor(&self) -> &Arc<Executor> {
        &self.batch_executor
    }

    pub fn executor_for(&self, priority: TaskPriority) -> Arc<Executor> {
        match priority {
            TaskPriority::High => Arc::clone(&self.high_priority_executor),
            TaskPriority::Normal => self.executor(),
        }
    }

    /// Track a submitted task for observability. Safe to call from any thread.
    pub fn add_submitted_task_to_view(&self, wrapped: Arc<WrappedTask>) {
        self.metrics.write().record_submission();
        self.tracked.write().insert(wrapped);
    }

    /// Tasks that are still waiting or running, in submission order.
    pub fn tracked_tasks(&self) -> Vec<Arc<WrappedTask>> {
        let mut tracked = self.tracked.write();
        tracked.prune();
        tracked.tasks.values().cloned().collect()
    }

    /// Registry entries including terminal ones not yet swept.
    #[cfg(test)]
    pub(crate) fn registry_len(&self) -> usize {
        self.tracked.read().tasks.len()
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.metrics.read().clone()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            number_of_threads: self.number_of_threads(),
            executor: self.executor().stats(),
            high_priority_executor: self.high_priority_executor.stats(),
            batch_executor: self.batch_executor.stats(),
            tracked: self.tracked_tasks().iter().map(|t| t.info()).collect(),
            metrics: self.metrics(),
        }
    }

    /// Cancel every tracked task and stop the shared pools from taking work.
    pub fn shutdown(&self) {
        let tracked = self.tracked.write().drain();
        info!(tracked = tracked.len(), "task controller shutting down");
        for wrapped in &tracked {
            wrapped.cancel();
        }
        self.executor.read().shutdown();
        self.high_priority_executor.shutdown();
        self.batch_executor.shutdown();
    }

    /// Run a wrapped task on the current thread and record its outcome.
    pub(crate) fn execute_tracked(&self, wrapped: &WrappedTask) -> TaskStatus {
        let status = wrapped.execute();
        self.metrics
            .write()
            .record_execution(status, wrapped.run_time().unwrap_or_default());
        status
    }

    pub(crate) fn record_rejection(&self) {
        self.metrics.write().record_rejection();
    }
}

/// Serializable view of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub number_of_threads: usize,
    pub executor: ExecutorStats,
    pub high_priority_executor: ExecutorStats,
    pub batch_executor: ExecutorStats,
    pub tracked: Vec<TaskInfo>,
    pub metrics: ControllerMetrics,
}
