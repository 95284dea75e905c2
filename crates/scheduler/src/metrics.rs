use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::TaskStatus;

/// Controller counters exposed to dashboards and logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerMetrics {
    /// Tasks registered with the controller, whether queued on an executor
    /// (batch sub-tasks included) or run on the caller's thread.
    pub tasks_submitted: u64,
    /// Submissions refused because the target executor was shut down.
    pub tasks_rejected: u64,
    /// Tasks whose wrapper has returned.
    pub tasks_executed: u64,
    /// Final status of executed tasks.
    pub tasks_by_outcome: HashMap<TaskStatus, u64>,
    /// Rolling mean of time spent in `run()`.
    pub avg_task_duration: Duration,
    /// When the most recent task returned.
    pub last_completed: Option<DateTime<Utc>>,
}

impl ControllerMetrics {
    pub fn record_submission(&mut self) {
        self.tasks_submitted += 1;
    }

    pub fn record_rejection(&mut self) {
        self.tasks_rejected += 1;
    }

    /// Record a task execution.
    pub fn record_execution(&mut self, outcome: TaskStatus, duration: Duration) {
        self.tasks_executed += 1;
        *self.tasks_by_outcome.entry(outcome).or_default() += 1;
        self.last_completed = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let count = self.tasks_executed;
        self.avg_task_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_task_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn outcome_count(&self, status: TaskStatus) -> u64 {
        self.tasks_by_outcome.get(&status).copied().unwrap_or(0)
    }
}
