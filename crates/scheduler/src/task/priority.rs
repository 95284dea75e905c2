use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduling class. Selects which shared executor admits a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Urgent work, dispatched to the on-demand high-priority executor.
    High = 0,
    /// Everything else, dispatched to the bounded normal executor.
    #[default]
    Normal = 1,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::High => write!(f, "HIGH"),
            TaskPriority::Normal => write!(f, "NORMAL"),
        }
    }
}
