//! Result collection and completion counting.
//!
//! A resolved job is appended to the [`ResultCollector`] before the
//! [`CompletionTracker`] count is bumped, so a coordinator that sees
//! `completed >= n` can read all `n` results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use benchport_core::{Device, Tensor};
use tracing::{error, info};

use crate::job::{lock, CompletionFn, Job, JobOutcome, TimingRecord, FAILED_LATENCY_MS};

#[derive(Clone, Debug)]
pub struct InferenceResult {
    pub job_id: u64,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    pub latency_ms: f64,
    pub device: Option<Device>,
    pub device_id: Option<u32>,
    pub worker_id: Option<usize>,
    pub timing: TimingRecord,
    pub error: Option<String>,
}

impl InferenceResult {
    pub fn from_outcome(job: &Job, outcome: JobOutcome) -> Self {
        let placement = job.placement();
        let (outputs, latency_ms, error) = match outcome {
            Ok(out) => (out.outputs, out.latency_ms, None),
            Err(err) => (Vec::new(), FAILED_LATENCY_MS, Some(err.to_string())),
        };
        Self {
            job_id: job.id(),
            inputs: job.inputs().to_vec(),
            outputs,
            latency_ms,
            device: placement.map(|p| p.device),
            device_id: placement.and_then(|p| p.device.device_id()),
            worker_id: placement.map(|p| p.worker_id),
            timing: job.timing(),
            error,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.latency_ms < 0.0
    }
}

/// Upper bound on the up-front reservation; larger runs grow on demand.
const MAX_RESERVED_RESULTS: usize = 1 << 16;

/// Append-only record of resolved jobs.
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<Vec<InferenceResult>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Mutex::new(Vec::with_capacity(capacity.min(MAX_RESERVED_RESULTS))),
        }
    }

    pub fn push(&self, result: InferenceResult) {
        lock(&self.results).push(result);
    }

    pub fn len(&self) -> usize {
        lock(&self.results).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<InferenceResult> {
        lock(&self.results).clone()
    }

    /// Moves the results out, leaving the collector empty.
    pub fn take(&self) -> Vec<InferenceResult> {
        std::mem::take(&mut *lock(&self.results))
    }
}

/// Counts resolved jobs and wakes the coordinator.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    completed: AtomicUsize,
    gate: Mutex<()>,
    all_done: Condvar,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn mark_complete(&self) {
        // Taking the gate orders the increment against a waiter that has
        // checked the predicate but not yet parked.
        let _gate = lock(&self.gate);
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.all_done.notify_all();
    }

    pub fn wait_for(&self, expected: usize) {
        let gate = lock(&self.gate);
        let _gate = self
            .all_done
            .wait_while(gate, |_| self.completed() < expected)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait_for`](Self::wait_for) but gives up after `timeout`.
    /// Returns whether `expected` was reached.
    pub fn wait_for_timeout(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = lock(&self.gate);
        while self.completed() < expected {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = match self.all_done.wait_timeout(gate, deadline - now) {
                Ok((gate, _)) => gate,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Builds the completion callback installed on each dispatched job.
pub fn completion_callback(
    results: Arc<ResultCollector>,
    tracker: Arc<CompletionTracker>,
) -> CompletionFn {
    Box::new(move |job: &Job, outcome: JobOutcome| {
        let result = InferenceResult::from_outcome(job, outcome);
        match &result.error {
            None => info!(
                target: "benchport::stats",
                job_id = result.job_id,
                latency_ms = result.latency_ms,
                "completed job"
            ),
            Some(reason) => error!(job_id = result.job_id, %reason, "job failed"),
        }

        results.push(result);
        tracker.mark_complete();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_capacity_hint_is_clamped() {
        let results = ResultCollector::with_capacity(usize::MAX);
        assert!(results.is_empty());
        assert!(lock(&results.results).capacity() <= MAX_RESERVED_RESULTS);
    }
}
