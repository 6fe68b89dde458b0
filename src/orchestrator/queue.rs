//! Shared job queue with in-flight tracking
//!
//! Workers block on [`JobQueue::pop`]. The queue is drained only when it is empty *and* no
//! job is in flight: a running job may still push nested discoveries.

use crate::types::{ArchiveJob, JobId};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<ArchiveJob>,
    in_flight: usize,
    drained: bool,
    seen: HashSet<JobId>,
}

/// FIFO of jobs shared by all workers
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `job` unless a job with the same identity was queued before in this run
    ///
    /// Returns whether the job was added.
    pub fn push(&self, job: ArchiveJob) -> bool {
        {
            let mut state = self.lock();
            if state.drained || !state.seen.insert(job.id().clone()) {
                debug!(job_id = %job.id(), "job already queued in this run");
                return false;
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_waiters();
        true
    }

    /// Take the next job, waiting while other jobs are in flight
    ///
    /// Returns `None` once the queue is drained or `cancel` fires. Every `Some` must be
    /// matched by a call to [`JobQueue::finish`].
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<ArchiveJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before looking, so a push between the check and the wait is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.drained {
                    return None;
                }
                if let Some(job) = state.jobs.pop_front() {
                    state.in_flight += 1;
                    return Some(job);
                }
                if state.in_flight == 0 {
                    state.drained = true;
                    drop(state);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Mark one popped job as done
    pub fn finish(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Jobs waiting to be popped
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Whether no job is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the state half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
