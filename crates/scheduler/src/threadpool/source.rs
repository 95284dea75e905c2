use std::fmt;
use std::sync::Arc;

use crate::controller::TaskController;
use crate::error::SchedulerError;
use crate::executor::Executor;

/// Where a [`ThreadPoolTask`](super::ThreadPoolTask) gets its executor from.
///
/// This is the only thing that differs between batch variants: how the pool
/// is built and whether the batch shuts it down when done.
#[derive(Clone)]
pub enum PoolSource {
    /// A private bounded pool of `threads` workers, created per run.
    Fixed { threads: usize },
    /// An externally owned pool. Shut down by the batch only with `auto_shutdown`.
    Provided { executor: Arc<Executor>, auto_shutdown: bool },
    /// A private pool giving every sub-task its own thread, for blocking I/O.
    Virtual,
}

impl PoolSource {
    /// Fail fast on sources that could never run anything.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            PoolSource::Fixed { threads: 0 } => Err(SchedulerError::InvalidThreadCount(0)),
            _ => Ok(()),
        }
    }

    /// Build (or hand out) the executor for one batch run.
    ///
    /// Private pools are named `{label}-fixed` or `{label}-virtual`, so threads of
    /// concurrent batches stay distinguishable.
    pub fn create_thread_pool(
        &self,
        controller: &TaskController,
        label: &str,
    ) -> Result<Arc<Executor>, SchedulerError> {
        match self {
            PoolSource::Fixed { threads } => {
                Ok(Arc::new(Executor::bounded(format!("{label}-fixed"), *threads)?))
            }
            PoolSource::Provided { executor, .. } => Ok(Arc::clone(executor)),
            PoolSource::Virtual => Ok(Arc::new(Executor::virtual_threads(
                format!("{label}-virtual"),
                controller.config().virtual_stack_size(),
            ))),
        }
    }

    /// Whether the batch is responsible for shutting the pool down.
    pub fn owns_pool(&self) -> bool {
        match self {
            PoolSource::Fixed { .. } | PoolSource::Virtual => true,
            PoolSource::Provided { auto_shutdown, .. } => *auto_shutdown,
        }
    }
}

impl fmt::Debug for PoolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolSource::Fixed { threads } => f.debug_struct("Fixed").field("threads", threads).finish(),
            PoolSource::Provided { executor, auto_shutdown } => f
                .debug_struct("Provided")
                .field("executor", &executor.name())
                .field("auto_shutdown", auto_shutdown)
                .finish(),
            PoolSource::Virtual => write!(f, "Virtual"),
        }
    }
}
