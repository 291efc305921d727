use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use benchport_core::Tensor;
use tracing::{info, trace};

use crate::engine::{Codelet, EngineShared};
use crate::job::{Job, JobError, JobOutcome, JobOutput, Placement, Stage};
use crate::models::LoadedModel;

/// Runs codelets on one device until the engine closes.
pub(crate) struct DeviceWorker {
    id: usize,
    model: Arc<LoadedModel>,
    engine: Arc<EngineShared>,
}

impl DeviceWorker {
    pub(crate) fn new(id: usize, model: Arc<LoadedModel>, engine: Arc<EngineShared>) -> Self {
        Self { id, model, engine }
    }

    pub(crate) fn run(self) {
        info!(worker_id = self.id, device = %self.model.device, "worker started");
        while let Some(codelet) = self.engine.next_codelet(self.id) {
            self.execute(codelet);
        }
        info!(worker_id = self.id, "worker stopped");
    }

    fn execute(&self, codelet: Codelet) {
        let Codelet { job, done } = codelet;
        job.set_placement(Placement {
            device: self.model.device,
            worker_id: self.id,
        });

        job.stamp(Stage::CodeletStart);
        let staged = self.stage_inputs(&job);
        job.stamp(Stage::CodeletEnd);

        job.stamp(Stage::InferenceStart);
        let outcome = staged.and_then(|inputs| self.infer(inputs));
        job.stamp(Stage::CallbackStart);

        let outputs = outcome.and_then(|outputs| {
            if outputs.is_empty() {
                Err(JobError::MissingOutput)
            } else {
                Ok(outputs)
            }
        });
        job.stamp(Stage::CallbackEnd);

        let latency_ms = job.elapsed_ms();
        trace!(job_id = job.id(), worker_id = self.id, latency_ms, "codelet finished");
        let outcome: JobOutcome = outputs.map(|outputs| JobOutput { outputs, latency_ms });
        job.complete(outcome);

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Host tensors are handed to the replica as-is; the backend session
    /// owns the transfer to its device.
    fn stage_inputs(&self, job: &Job) -> Result<Vec<Tensor>, JobError> {
        let expected = &self.model.spec().inputs;
        for (spec, tensor) in expected.iter().zip(job.inputs()) {
            if spec.dtype != tensor.dtype() {
                return Err(JobError::Execution(format!(
                    "input {} expects {}, got {}",
                    spec.name.0,
                    spec.dtype,
                    tensor.dtype()
                )));
            }
        }
        Ok(job.inputs().to_vec())
    }

    fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, JobError> {
        match catch_unwind(AssertUnwindSafe(|| self.model.infer(inputs))) {
            Ok(Ok(outputs)) => Ok(outputs),
            Ok(Err(err)) => Err(JobError::Execution(format!("{err:#}"))),
            Err(_) => Err(JobError::Execution("model panicked".to_string())),
        }
    }
}
