//! Task execution and scheduling: cancellable tasks, prioritized shared
//! pools, and composite batches that behave like a single task.

pub mod all_finished;
pub mod controller;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod task;
pub mod threadpool;
pub mod wait;
pub mod wrapped;

pub use all_finished::AllTasksFinished;
pub use controller::{ControllerSnapshot, TaskController};
pub use error::{SchedulerError, TaskError};
pub use executor::{Executor, ExecutorKind, ExecutorStats, HandleState, TaskHandle};
pub use metrics::ControllerMetrics;
pub use task::{FnTask, StatusListener, Task, TaskCore, TaskId, TaskPriority, TaskStatus};
pub use threadpool::{PoolSource, ThreadPoolTask};
pub use wait::{aggregate_status, wait_for_tasks_to_finish};
pub use wrapped::{TaskInfo, WrappedTask};
