use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TaskError;

use super::{Task, TaskCore, TaskPriority, TaskStatus};

type TaskBody = Box<dyn Fn(&FnTask) -> Result<(), TaskError> + Send + Sync>;

/// A task whose work is a closure.
///
/// The closure receives the task itself so it can report progress and poll
/// for cancellation.
pub struct FnTask {
    core: TaskCore,
    description: String,
    priority: TaskPriority,
    /// `f64` bits of the last reported progress.
    progress: AtomicU64,
    body: TaskBody,
}

impl FnTask {
    pub fn new<F>(description: impl Into<String>, body: F) -> Self
    where
        F: Fn(&FnTask) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            core: TaskCore::new(),
            description: description.into(),
            priority: TaskPriority::Normal,
            progress: AtomicU64::new(0f64.to_bits()),
            body: Box::new(body),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Report progress; values are clamped to `[0, 1]`.
    pub fn set_progress(&self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.progress.store(fraction.to_bits(), Ordering::Relaxed);
    }
}

impl Task for FnTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn finished_percentage(&self) -> f64 {
        if self.status() == TaskStatus::Finished {
            return 1.0;
        }
        f64::from_bits(self.progress.load(Ordering::Relaxed))
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn run(&self) -> Result<(), TaskError> {
        (self.body)(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped() {
        let task = FnTask::new("clamp", |_| Ok(()));
        task.set_progress(1.7);
        assert_eq!(task.finished_percentage(), 1.0);
        task.set_progress(-3.0);
        assert_eq!(task.finished_percentage(), 0.0);
        task.set_progress(f64::NAN);
        assert_eq!(task.finished_percentage(), 0.0);
    }

    #[test]
    fn body_sees_the_task() {
        let task = FnTask::new("halfway", |me| {
            me.set_progress(0.5);
            Ok(())
        })
        .with_priority(TaskPriority::High);

        assert!(task.run().is_ok());
        assert_eq!(task.finished_percentage(), 0.5);
        assert_eq!(task.priority(), TaskPriority::High);
        assert_eq!(task.description(), "halfway");
    }
}
