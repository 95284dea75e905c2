//! Worker pools that run submitted jobs.
//!
//! One [`Executor`] type covers the three pool shapes the scheduler needs:
//! - **bounded**: a fixed number of `rayon` workers, FIFO dispatch
//! - **on-demand**: zero core threads, grows when every worker is busy
//! - **virtual**: every job gets its own small-stack thread, for blocking I/O

mod handle;
mod on_demand;

pub use handle::{HandleState, TaskHandle};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::SchedulerError;

use self::on_demand::OnDemandPool;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shape of an executor's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorKind {
    Bounded,
    OnDemand,
    Virtual,
}

enum Pool {
    Bounded { pool: rayon::ThreadPool, threads: usize },
    OnDemand(OnDemandPool),
    Virtual { stack_size: usize, next_thread_id: AtomicUsize },
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
}

/// Point-in-time view of an executor, for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub name: String,
    pub kind: ExecutorKind,
    pub core_pool_size: Option<usize>,
    pub threads: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub shutdown: bool,
}

/// A pool of worker threads accepting jobs until shut down.
pub struct Executor {
    name: String,
    pool: Pool,
    counters: Arc<Counters>,
    shutdown: AtomicBool,
}

impl Executor {
    /// A pool of exactly `threads` workers.
    pub fn bounded(name: impl Into<String>, threads: usize) -> Result<Self, SchedulerError> {
        if threads == 0 {
            return Err(SchedulerError::InvalidThreadCount(threads));
        }
        let name = name.into();
        let thread_prefix = name.clone();
        let panic_name = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .panic_handler(move |_| {
                error!(executor = %panic_name, "job panicked on pool worker");
            })
            .build()?;

        info!(executor = %name, threads, "created bounded executor");
        Ok(Self::with_pool(name, Pool::Bounded { pool, threads }))
    }

    /// A pool with no core threads; idle workers exit after `keep_alive`.
    pub fn on_demand(name: impl Into<String>, keep_alive: Duration) -> Self {
        let name = name.into();
        info!(executor = %name, keep_alive = ?keep_alive, "created on-demand executor");
        let pool = OnDemandPool::new(&name, keep_alive);
        Self::with_pool(name, Pool::OnDemand(pool))
    }

    /// A pool that starts a dedicated thread of `stack_size` bytes per job.
    pub fn virtual_threads(name: impl Into<String>, stack_size: usize) -> Self {
        let name = name.into();
        debug!(executor = %name, stack_size, "created virtual-thread executor");
        Self::with_pool(
            name,
            Pool::Virtual { stack_size, next_thread_id: AtomicUsize::new(0) },
        )
    }

    fn with_pool(name: String, pool: Pool) -> Self {
        Self {
            name,
            pool,
            counters: Arc::new(Counters::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Queue `job` for execution.
    ///
    /// Fails with [`SchedulerError::Rejected`] once the executor is shut down.
    pub fn submit<F>(&self, job: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::Rejected { executor: self.name.clone() });
        }

        let handle = TaskHandle::new();
        let job_handle = handle.clone();
        let counters = Arc::clone(&self.counters);
        counters.queued.fetch_add(1, Ordering::SeqCst);

        let run: Job = Box::new(move || {
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            if !job_handle.try_start() {
                return;
            }
            counters.active.fetch_add(1, Ordering::SeqCst);
            let _done = Completion { handle: job_handle, counters: &counters };
            job();
        });

        let dispatched = match &self.pool {
            Pool::Bounded { pool, .. } => {
                pool.spawn_fifo(run);
                Ok(())
            }
            Pool::OnDemand(pool) => pool.execute(run),
            Pool::Virtual { stack_size, next_thread_id } => {
                let id = next_thread_id.fetch_add(1, Ordering::Relaxed);
                thread::Builder::new()
                    .name(format!("{}-v{}", self.name, id))
                    .stack_size(*stack_size)
                    .spawn(run)
                    .map(|_| ())
                    .map_err(SchedulerError::ThreadSpawn)
            }
        };

        if let Err(e) = dispatched {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(handle)
    }

    /// Stop accepting new jobs. Jobs already queued still run. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Pool::OnDemand(pool) = &self.pool {
            pool.shutdown();
        }
        debug!(executor = %self.name, "executor shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExecutorKind {
        match self.pool {
            Pool::Bounded { .. } => ExecutorKind::Bounded,
            Pool::OnDemand(_) => ExecutorKind::OnDemand,
            Pool::Virtual { .. } => ExecutorKind::Virtual,
        }
    }

    /// Fixed worker count, if this pool has one.
    pub fn core_pool_size(&self) -> Option<usize> {
        match self.pool {
            Pool::Bounded { threads, .. } => Some(threads),
            Pool::OnDemand(_) | Pool::Virtual { .. } => None,
        }
    }

    /// Threads currently alive in the pool.
    pub fn pool_size(&self) -> usize {
        match &self.pool {
            Pool::Bounded { threads, .. } => *threads,
            Pool::OnDemand(pool) => pool.live_threads(),
            Pool::Virtual { .. } => self.active_count(),
        }
    }

    /// Jobs currently running.
    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued_count(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Jobs that ran to completion (successfully or not).
    pub fn completed_count(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            name: self.name.clone(),
            kind: self.kind(),
            core_pool_size: self.core_pool_size(),
            threads: self.pool_size(),
            active: self.active_count(),
            queued: self.queued_count(),
            completed: self.completed_count(),
            shutdown: self.is_shutdown(),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Settles the handle and counters when a job returns or unwinds.
struct Completion<'a> {
    handle: TaskHandle,
    counters: &'a Counters,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        self.handle.complete();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, mpsc};

    use super::*;

    #[test]
    fn bounded_rejects_zero_threads() {
        let err = Executor::bounded("empty", 0).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidThreadCount(0)));
    }

    #[test]
    fn bounded_runs_jobs() {
        let executor = Executor::bounded("test-bounded", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor
                    .submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();

        for handle in &handles {
            handle.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(executor.completed_count(), 8);
        assert_eq!(executor.core_pool_size(), Some(2));
        assert_eq!(executor.kind(), ExecutorKind::Bounded);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let executor = Executor::bounded("test-shutdown", 1).unwrap();
        executor.shutdown();
        executor.shutdown();
        assert!(executor.is_shutdown());
        let err = executor.submit(|| {}).unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected { .. }));
        assert_eq!(executor.queued_count(), 0);
    }

    #[test]
    fn queued_job_can_be_cancelled() {
        let executor = Executor::bounded("test-cancel", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = executor
            .submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let queued = executor
            .submit(move || flag.store(true, Ordering::SeqCst))
            .unwrap();

        assert!(queued.cancel());
        release_tx.send(()).unwrap();
        blocker.wait();
        queued.wait();

        // Give the worker a chance to pop the cancelled job.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queued.state(), HandleState::Cancelled);
    }

    #[test]
    fn shutdown_still_drains_queued_jobs() {
        let executor = Executor::bounded("test-drain", 1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor
                    .submit(move || {
                        std::thread::sleep(Duration::from_millis(5));
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();
        executor.shutdown();

        for handle in &handles {
            handle.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn on_demand_grows_when_all_workers_are_busy() {
        let executor = Executor::on_demand("test-on-demand", Duration::from_secs(5));
        assert_eq!(executor.pool_size(), 0);
        assert_eq!(executor.core_pool_size(), None);

        // All three jobs must run at the same time for the barrier to release.
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                executor.submit(move || {
                    barrier.wait();
                })
                .unwrap()
            })
            .collect();
        barrier.wait();

        for handle in &handles {
            handle.wait();
        }
        assert!(executor.pool_size() >= 3);
    }

    #[test]
    fn on_demand_idle_workers_exit_after_keep_alive() {
        let executor = Executor::on_demand("test-keep-alive", Duration::from_millis(20));
        executor.submit(|| {}).unwrap().wait();

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(executor.pool_size(), 0);

        // A later job still runs: a fresh worker is spawned for it.
        let handle = executor.submit(|| {}).unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn on_demand_rejects_after_shutdown() {
        let executor = Executor::on_demand("test-on-demand-shutdown", Duration::from_secs(1));
        executor.shutdown();
        assert!(matches!(
            executor.submit(|| {}),
            Err(SchedulerError::Rejected { .. })
        ));
    }

    #[test]
    fn virtual_threads_run_every_job_concurrently() {
        let executor = Executor::virtual_threads("test-virtual", 64 * 1024);
        let jobs = 6;
        let barrier = Arc::new(Barrier::new(jobs + 1));
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..jobs)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let names = Arc::clone(&names);
                executor
                    .submit(move || {
                        let name = std::thread::current().name().map(str::to_string);
                        names.lock().push(name);
                        barrier.wait();
                    })
                    .unwrap()
            })
            .collect();
        barrier.wait();
        for handle in &handles {
            handle.wait();
        }

        let mut names = names.lock().clone();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), jobs, "each job runs on its own thread");
        assert_eq!(executor.kind(), ExecutorKind::Virtual);
    }

    #[test]
    fn panicking_job_still_settles_handle() {
        let executor = Executor::on_demand("test-panic", Duration::from_secs(1));
        let handle = executor.submit(|| panic!("boom")).unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(5)));
        assert_eq!(handle.state(), HandleState::Done);
        assert_eq!(executor.active_count(), 0);
    }
}
