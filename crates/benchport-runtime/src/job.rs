//! Inference jobs and their per-stage timing record.
//!
//! A job is shared as a [`JobHandle`] between the producer, the queue, the
//! dispatcher and the submission adapter. Every timing stage has exactly one
//! writer, and the completion callback can only ever run once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use benchport_core::{DType, Device, Tensor};
use thiserror::Error;

/// Latency reported for a job that did not produce outputs.
pub const FAILED_LATENCY_MS: f64 = -1.0;

pub type JobHandle = Arc<Job>;

/// Single-shot completion callback. Receives the job by reference so the
/// closure does not need to keep its own handle alive.
pub type CompletionFn = Box<dyn FnOnce(&Job, JobOutcome) + Send + 'static>;

pub type JobOutcome = Result<JobOutput, JobError>;

#[derive(Clone, Debug)]
pub struct JobOutput {
    pub outputs: Vec<Tensor>,
    pub latency_ms: f64,
}

/// Reason a job resolved without outputs.
#[derive(Clone, Debug, Error)]
pub enum JobError {
    #[error("submission failed: {0}")]
    Submit(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("model returned no output")]
    MissingOutput,
    #[error("device engine shut down before the job ran")]
    Abandoned,
}

/// Pipeline stages in the order their timestamps must appear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Enqueued,
    Dequeued,
    BeforeSubmit,
    CodeletStart,
    CodeletEnd,
    InferenceStart,
    CallbackStart,
    CallbackEnd,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Enqueued,
        Stage::Dequeued,
        Stage::BeforeSubmit,
        Stage::CodeletStart,
        Stage::CodeletEnd,
        Stage::InferenceStart,
        Stage::CallbackStart,
        Stage::CallbackEnd,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Enqueued => "enqueued",
            Stage::Dequeued => "dequeued",
            Stage::BeforeSubmit => "before_submit",
            Stage::CodeletStart => "codelet_start",
            Stage::CodeletEnd => "codelet_end",
            Stage::InferenceStart => "inference_start",
            Stage::CallbackStart => "callback_start",
            Stage::CallbackEnd => "callback_end",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimingRecord {
    stamps: [Option<Instant>; 8],
}

impl TimingRecord {
    pub fn get(&self, stage: Stage) -> Option<Instant> {
        self.stamps[stage.index()]
    }

    /// Records `at` for `stage` unless it was already stamped. Returns whether
    /// the stamp was taken.
    pub fn stamp_at(&mut self, stage: Stage, at: Instant) -> bool {
        let slot = &mut self.stamps[stage.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.stamps.iter().all(Option::is_some)
    }

    /// True when every recorded stamp is no earlier than the previous
    /// recorded one.
    pub fn is_monotonic(&self) -> bool {
        let mut last: Option<Instant> = None;
        for at in self.stamps.iter().flatten() {
            if last.is_some_and(|prev| *at < prev) {
                return false;
            }
            last = Some(*at);
        }
        true
    }

    /// Time spent between two stages, if both were stamped.
    pub fn between(&self, from: Stage, to: Stage) -> Option<Duration> {
        Some(self.get(to)?.saturating_duration_since(self.get(from)?))
    }
}

/// Where a job ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub device: Device,
    pub worker_id: usize,
}

pub struct Job {
    id: u64,
    inputs: Vec<Tensor>,
    expected_output_types: Vec<DType>,
    terminator: bool,
    timing: Mutex<TimingRecord>,
    placement: Mutex<Option<Placement>>,
    on_complete: Mutex<Option<CompletionFn>>,
}

impl Job {
    pub fn new(id: u64, inputs: Vec<Tensor>, expected_output_types: Vec<DType>) -> JobHandle {
        Arc::new(Self {
            id,
            inputs,
            expected_output_types,
            terminator: false,
            timing: Mutex::new(TimingRecord::default()),
            placement: Mutex::new(None),
            on_complete: Mutex::new(None),
        })
    }

    /// The shutdown sentinel. Carries no data and is never dispatched.
    pub fn terminator() -> JobHandle {
        Arc::new(Self {
            id: u64::MAX,
            inputs: Vec::new(),
            expected_output_types: Vec::new(),
            terminator: true,
            timing: Mutex::new(TimingRecord::default()),
            placement: Mutex::new(None),
            on_complete: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    pub fn expected_output_types(&self) -> &[DType] {
        &self.expected_output_types
    }

    pub fn is_terminator(&self) -> bool {
        self.terminator
    }

    pub fn stamp(&self, stage: Stage) -> bool {
        lock(&self.timing).stamp_at(stage, Instant::now())
    }

    pub fn timing(&self) -> TimingRecord {
        *lock(&self.timing)
    }

    /// Milliseconds from enqueue until now, or until `callback_end` if set.
    pub fn elapsed_ms(&self) -> f64 {
        let timing = self.timing();
        let Some(start) = timing.get(Stage::Enqueued) else {
            return 0.0;
        };
        let end = timing.get(Stage::CallbackEnd).unwrap_or_else(Instant::now);
        end.saturating_duration_since(start).as_secs_f64() * 1000.0
    }

    pub fn set_placement(&self, placement: Placement) {
        *lock(&self.placement) = Some(placement);
    }

    pub fn placement(&self) -> Option<Placement> {
        *lock(&self.placement)
    }

    pub fn set_on_complete(&self, callback: CompletionFn) {
        *lock(&self.on_complete) = Some(callback);
    }

    pub fn has_on_complete(&self) -> bool {
        lock(&self.on_complete).is_some()
    }

    /// Resolves the job. The callback runs at most once; later calls (or a
    /// call with no callback installed) return `false` and drop `outcome`.
    pub fn complete(&self, outcome: JobOutcome) -> bool {
        let callback = lock(&self.on_complete).take();
        match callback {
            Some(callback) => {
                callback(self, outcome);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("inputs", &self.inputs.len())
            .field("terminator", &self.terminator)
            .field("timing", &self.timing())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
