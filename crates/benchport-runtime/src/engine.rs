//! Thread-per-device execution engine.
//!
//! ```text
//!  submit() ──► placement (policy) ──► per-worker / shared queues
//!                                           │
//!              worker 0 (cpu) ◄─────────────┤  idle workers steal (lws)
//!              worker 1 (cuda:0) ◄──────────┤
//!              worker n ... ◄───────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::{ensure, Context, Result};
use benchport_core::Device;
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, SchedulerPolicy};
use crate::job::{lock, JobError, JobHandle, Stage};
use crate::models::{LoadedModel, ModelSet};
use crate::submit::{SubmissionAdapter, SubmitError};
use crate::worker::DeviceWorker;

/// A job as scheduled on the engine.
pub(crate) struct Codelet {
    pub job: JobHandle,
    /// Signalled once the job is resolved; set in synchronous mode.
    pub done: Option<mpsc::SyncSender<()>>,
}

struct EngineState {
    shared: VecDeque<Codelet>,
    per_worker: Vec<VecDeque<Codelet>>,
    next: usize,
    closed: bool,
}

impl EngineState {
    fn place(&mut self, policy: SchedulerPolicy, codelet: Codelet) {
        match policy {
            SchedulerPolicy::Eager => self.shared.push_back(codelet),
            SchedulerPolicy::RoundRobin | SchedulerPolicy::Lws => {
                let idx = self.next % self.per_worker.len();
                self.next += 1;
                self.per_worker[idx].push_back(codelet);
            }
        }
    }

    fn take(&mut self, policy: SchedulerPolicy, worker: usize) -> Option<Codelet> {
        match policy {
            SchedulerPolicy::Eager => self.shared.pop_front(),
            SchedulerPolicy::RoundRobin => self.per_worker[worker].pop_front(),
            SchedulerPolicy::Lws => {
                if let Some(codelet) = self.per_worker[worker].pop_front() {
                    return Some(codelet);
                }
                let victim = self
                    .per_worker
                    .iter()
                    .enumerate()
                    .filter(|(idx, q)| *idx != worker && !q.is_empty())
                    .max_by_key(|(_, q)| q.len())
                    .map(|(idx, _)| idx)?;
                let stolen = self.per_worker[victim].pop_back();
                if let Some(codelet) = &stolen {
                    debug!(worker_id = worker, victim, job_id = codelet.job.id(), "stole codelet");
                }
                stolen
            }
        }
    }

    fn drain(&mut self) -> Vec<Codelet> {
        let mut left: Vec<Codelet> = self.shared.drain(..).collect();
        for q in &mut self.per_worker {
            left.extend(q.drain(..));
        }
        left
    }
}

pub(crate) struct EngineShared {
    policy: SchedulerPolicy,
    state: Mutex<EngineState>,
    ready: Condvar,
}

impl EngineShared {
    /// Blocks until a codelet is available for `worker`. Returns `None` once
    /// the engine is closed and nothing is left for this worker.
    pub(crate) fn next_codelet(&self, worker: usize) -> Option<Codelet> {
        let mut state = lock(&self.state);
        loop {
            if let Some(codelet) = state.take(self.policy, worker) {
                return Some(codelet);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Submission adapter that runs jobs on one worker thread per device.
pub struct DeviceEngine {
    shared: Arc<EngineShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    devices: Vec<Device>,
    input_count: usize,
    synchronous: bool,
}

impl DeviceEngine {
    pub fn start(
        models: Vec<Arc<LoadedModel>>,
        policy: SchedulerPolicy,
        synchronous: bool,
    ) -> Result<Self> {
        ensure!(!models.is_empty(), "device engine needs at least one device");

        let input_count = models[0].spec().inputs.len();
        let devices: Vec<Device> = models.iter().map(|m| m.device).collect();
        let shared = Arc::new(EngineShared {
            policy,
            state: Mutex::new(EngineState {
                shared: VecDeque::new(),
                per_worker: models.iter().map(|_| VecDeque::new()).collect(),
                next: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(models.len());
        for (id, model) in models.into_iter().enumerate() {
            let worker = DeviceWorker::new(id, model, shared.clone());
            let handle = std::thread::Builder::new()
                .name(format!("benchport-worker-{id}"))
                .spawn(move || worker.run())
                .with_context(|| format!("failed to spawn worker {id}"))?;
            workers.push(handle);
        }

        info!(policy = %policy, workers = workers.len(), synchronous, "device engine started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            devices,
            input_count,
            synchronous,
        })
    }

    pub fn from_config(models: &ModelSet, config: &RuntimeConfig) -> Result<Self> {
        Self::start(models.for_config(config)?, config.scheduler, config.synchronous)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn worker_count(&self) -> usize {
        self.devices.len()
    }

    /// Stops accepting work, lets workers drain their queues and joins them.
    /// Codelets left behind by a dead worker resolve as abandoned.
    pub fn shutdown(&self) {
        lock(&self.shared.state).closed = true;
        self.shared.ready.notify_all();

        let workers = std::mem::take(&mut *lock(&self.workers));
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            if handle.join().is_err() {
                warn!("device worker panicked");
            }
        }

        let left = lock(&self.shared.state).drain();
        for codelet in left {
            warn!(job_id = codelet.job.id(), "codelet abandoned at shutdown");
            codelet.job.complete(Err(JobError::Abandoned));
            if let Some(done) = codelet.done {
                let _ = done.send(());
            }
        }
        info!("device engine stopped");
    }
}

impl SubmissionAdapter for DeviceEngine {
    fn submit(&self, job: JobHandle) -> Result<(), SubmitError> {
        job.stamp(Stage::BeforeSubmit);

        if self.devices.is_empty() {
            return Err(SubmitError::NoDevice);
        }
        if self.input_count != 0 && job.inputs().len() != self.input_count {
            return Err(SubmitError::MalformedInput(format!(
                "expected {} inputs, got {}",
                self.input_count,
                job.inputs().len()
            )));
        }
        if let Some(bad) = job.inputs().iter().find_map(|t| t.check_len().err()) {
            return Err(SubmitError::MalformedInput(bad.to_string()));
        }

        let (done, wait) = if self.synchronous {
            let (tx, rx) = mpsc::sync_channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(SubmitError::Closed);
            }
            state.place(self.shared.policy, Codelet { job, done });
        }
        self.shared.ready.notify_all();

        if let Some(wait) = wait {
            // A closed channel means the codelet was dropped after resolution.
            let _ = wait.recv();
        }
        Ok(())
    }
}

impl Drop for DeviceEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
