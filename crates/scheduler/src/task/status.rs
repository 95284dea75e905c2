use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state shared by every task.
///
/// ```text
/// Waiting ──► Processing ──► Finished
///    │            ├────────► Error
///    └────────────┴────────► Canceled
/// ```
///
/// `Finished`, `Canceled` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created but not yet started.
    #[default]
    Waiting,
    /// Running on a worker thread.
    Processing,
    Finished,
    Canceled,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Canceled | TaskStatus::Error)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Waiting, Processing) => true,
            (Processing, Finished) | (Processing, Error) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Severity used when folding many statuses into one: Error > Canceled > the rest.
    pub(crate) fn severity(self) -> u8 {
        match self {
            TaskStatus::Error => 3,
            TaskStatus::Canceled => 2,
            TaskStatus::Processing | TaskStatus::Waiting => 1,
            TaskStatus::Finished => 0,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Waiting => write!(f, "WAITING"),
            TaskStatus::Processing => write!(f, "PROCESSING"),
            TaskStatus::Finished => write!(f, "FINISHED"),
            TaskStatus::Canceled => write!(f, "CANCELED"),
            TaskStatus::Error => write!(f, "ERROR"),
        }
    }
}
