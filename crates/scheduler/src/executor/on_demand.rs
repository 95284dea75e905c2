use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SchedulerError;

use super::Job;

/// Pool with zero core threads that grows on demand.
///
/// Jobs are handed over a zero-capacity channel: `try_send` only succeeds when
/// an idle worker is blocked in `recv`. Otherwise a new worker is spawned with
/// the job as its first unit of work. Idle workers exit after `keep_alive`.
pub(super) struct OnDemandPool {
    name: String,
    keep_alive: Duration,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    live_threads: Arc<AtomicUsize>,
    next_thread_id: AtomicUsize,
}

impl OnDemandPool {
    pub(super) fn new(name: &str, keep_alive: Duration) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            name: name.to_string(),
            keep_alive,
            sender: Mutex::new(Some(sender)),
            receiver,
            live_threads: Arc::new(AtomicUsize::new(0)),
            next_thread_id: AtomicUsize::new(0),
        }
    }

    pub(super) fn execute(&self, job: Job) -> Result<(), SchedulerError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SchedulerError::Rejected { executor: self.name.clone() });
        };

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => self.spawn_worker(job),
            Err(TrySendError::Disconnected(_)) => {
                Err(SchedulerError::Rejected { executor: self.name.clone() })
            }
        }
    }

    /// Drop the sender so idle workers see a disconnect and exit.
    pub(super) fn shutdown(&self) {
        self.sender.lock().take();
    }

    pub(super) fn live_threads(&self) -> usize {
        self.live_threads.load(Ordering::SeqCst)
    }

    fn spawn_worker(&self, first: Job) -> Result<(), SchedulerError> {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.receiver.clone();
        let keep_alive = self.keep_alive;
        let live = Arc::clone(&self.live_threads);
        let name = format!("{}-{}", self.name, id);

        live.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _live = LiveThreadGuard(live);
            first();
            loop {
                match receiver.recv_timeout(keep_alive) {
                    Ok(job) => job(),
                    Err(RecvTimeoutError::Timeout) => {
                        debug!(thread = %name, "idle on-demand worker exiting");
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        if let Err(e) = spawned {
            self.live_threads.fetch_sub(1, Ordering::SeqCst);
            warn!(executor = %self.name, error = %e, "failed to spawn on-demand worker");
            return Err(SchedulerError::ThreadSpawn(e));
        }
        Ok(())
    }
}

/// Keeps the live-thread count right even if a job unwinds the worker.
struct LiveThreadGuard(Arc<AtomicUsize>);

impl Drop for LiveThreadGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
