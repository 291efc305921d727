use std::sync::Arc;

use tracing::{debug, error, info, trace};

use crate::completion::{completion_callback, CompletionTracker, ResultCollector};
use crate::job::{JobError, JobHandle, Stage};
use crate::queue::JobQueue;
use crate::submit::SubmissionAdapter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs accepted by the adapter.
    pub dispatched: u64,
    /// Jobs the adapter refused; resolved as failures by the dispatcher.
    pub rejected: u64,
}

/// Single consumer of the job queue. Runs until it pops the sentinel.
pub struct Dispatcher<'a> {
    queue: &'a JobQueue,
    adapter: &'a dyn SubmissionAdapter,
    results: Arc<ResultCollector>,
    tracker: Arc<CompletionTracker>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        queue: &'a JobQueue,
        adapter: &'a dyn SubmissionAdapter,
        results: Arc<ResultCollector>,
        tracker: Arc<CompletionTracker>,
    ) -> Self {
        Self {
            queue,
            adapter,
            results,
            tracker,
        }
    }

    pub fn run(&self) -> DispatchStats {
        info!("dispatcher started");
        let mut stats = DispatchStats::default();

        loop {
            let job = self.queue.wait_and_pop();
            if job.is_terminator() {
                info!("received shutdown signal, dispatcher stopping");
                break;
            }
            trace!(job_id = job.id(), "dequeued job");

            if self.dispatch(job) {
                stats.dispatched += 1;
            } else {
                stats.rejected += 1;
            }
        }

        info!(
            dispatched = stats.dispatched,
            rejected = stats.rejected,
            "dispatcher stopped"
        );
        stats
    }

    fn dispatch(&self, job: JobHandle) -> bool {
        job.set_on_complete(completion_callback(
            self.results.clone(),
            self.tracker.clone(),
        ));
        job.stamp(Stage::Dequeued);

        let job_id = job.id();
        debug!(job_id, "submitting job");
        match self.adapter.submit(job.clone()) {
            Ok(()) => true,
            Err(err) => {
                error!(job_id, error = %err, "job submission failed");
                job.complete(Err(JobError::Submit(err.to_string())));
                false
            }
        }
    }
}
