use thiserror::Error;

/// Failure reported by a task's own `run()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task canceled")]
    Canceled,
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised by executors and the controller.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid thread count {0}: a fixed pool needs at least one thread")]
    InvalidThreadCount(usize),

    #[error("failed to build thread pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    #[error("submission rejected by executor '{executor}' (shut down)")]
    Rejected { executor: String },

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] taskpool_core::CoreError),
}
