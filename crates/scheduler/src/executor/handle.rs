use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Execution state of one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleState {
    Queued,
    Running,
    Done,
    /// Cancelled before a worker picked it up; the job never runs.
    Cancelled,
}

struct HandleInner {
    state: Mutex<HandleState>,
    settled: Condvar,
}

/// Handle to a job submitted to an [`Executor`](super::Executor).
///
/// Cancellation never interrupts a running job: [`TaskHandle::cancel`] only
/// succeeds while the job is still queued.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(HandleState::Queued),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> HandleState {
        *self.inner.state.lock()
    }

    /// Cancel the job if no worker has started it. Returns whether it was cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != HandleState::Queued {
            return false;
        }
        *state = HandleState::Cancelled;
        self.inner.settled.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == HandleState::Cancelled
    }

    /// Whether the job completed or was cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), HandleState::Done | HandleState::Cancelled)
    }

    /// Block until the job completes or is cancelled.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while matches!(*state, HandleState::Queued | HandleState::Running) {
            self.inner.settled.wait(&mut state);
        }
    }

    /// Block for at most `timeout`. Returns whether the job settled in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while matches!(*state, HandleState::Queued | HandleState::Running) {
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !matches!(*state, HandleState::Queued | HandleState::Running)
    }

    /// Claim the job for a worker. Fails if it was cancelled while queued.
    pub(crate) fn try_start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != HandleState::Queued {
            return false;
        }
        *state = HandleState::Running;
        true
    }

    pub(crate) fn complete(&self) {
        let mut state = self.inner.state.lock();
        if *state == HandleState::Running {
            *state = HandleState::Done;
        }
        self.inner.settled.notify_all();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("state", &self.state()).finish()
    }
}
