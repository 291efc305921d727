use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use thiserror::Error;
use tracing::{trace, warn};

use crate::job::{lock, JobHandle, Stage};

#[derive(Debug, Error)]
pub enum PushError {
    /// The queue was shut down; the job is handed back untouched.
    #[error("job queue is closed (job {})", .0.id())]
    Closed(JobHandle),
}

struct QueueState {
    items: VecDeque<JobHandle>,
    closed: bool,
}

/// Blocking FIFO between the producer and the dispatcher.
///
/// After [`shutdown`](Self::shutdown) the queue still yields every job pushed
/// before it, then returns the same sentinel job on every call.
/// Pushes after shutdown are rejected with [`PushError::Closed`].
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    sentinel: JobHandle,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            sentinel: crate::job::Job::terminator(),
        }
    }

    /// Appends `job` and stamps its `enqueued` stage.
    pub fn push(&self, job: JobHandle) -> Result<(), PushError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                warn!(job_id = job.id(), "push after shutdown rejected");
                return Err(PushError::Closed(job));
            }
            job.stamp(Stage::Enqueued);
            trace!(job_id = job.id(), depth = state.items.len() + 1, "job enqueued");
            state.items.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    pub fn wait_and_pop(&self) -> JobHandle {
        let mut state = lock(&self.state);
        loop {
            if let Some(job) = state.items.pop_front() {
                return job;
            }
            if state.closed {
                return self.sentinel.clone();
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        if !state.closed {
            state.closed = true;
            trace!(pending = state.items.len(), "job queue closed");
        }
        drop(state);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
