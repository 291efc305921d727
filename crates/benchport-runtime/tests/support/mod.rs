#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use benchport_core::{
    Backend, BackendModel, DType, Device, IOName, ModelArtifact, ModelSpec, Shape, Tensor,
    TensorSpec,
};
use benchport_runtime::{
    InputPool, JobHandle, JobOutput, LoadedModel, Stage, SubmissionAdapter, SubmitError,
};

pub fn f32_spec() -> ModelSpec {
    let io = |name: &str| TensorSpec {
        name: IOName(name.to_string()),
        dtype: DType::F32,
        rank: 1,
        dims: vec![None],
    };
    ModelSpec {
        inputs: vec![io("x")],
        outputs: vec![io("y")],
    }
}

/// Multiplies its single f32 input by `factor`.
pub struct ScaleModel {
    pub spec: ModelSpec,
    pub factor: f32,
    pub delay: Duration,
}

impl ScaleModel {
    pub fn new(factor: f32) -> Self {
        Self {
            spec: f32_spec(),
            factor,
            delay: Duration::ZERO,
        }
    }
}

impl BackendModel for ScaleModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let x = inputs[0].to_f32_vec()?;
        let y: Vec<f32> = x.iter().map(|v| v * self.factor).collect();
        Ok(vec![Tensor::from_f32(inputs[0].shape().clone(), &y)])
    }
}

/// Always errors.
pub struct BrokenModel(pub ModelSpec);

impl BackendModel for BrokenModel {
    fn spec(&self) -> &ModelSpec {
        &self.0
    }

    fn infer(&mut self, _inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        bail!("device fault")
    }
}

/// Succeeds without producing any output.
pub struct SilentModel(pub ModelSpec);

impl BackendModel for SilentModel {
    fn spec(&self) -> &ModelSpec {
        &self.0
    }

    fn infer(&mut self, _inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        Ok(Vec::new())
    }
}

/// Emits a single f16 output the validator cannot widen.
pub struct HalfModel(pub ModelSpec);

impl BackendModel for HalfModel {
    fn spec(&self) -> &ModelSpec {
        &self.0
    }

    fn infer(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let shape = inputs[0].shape().clone();
        let bytes = vec![0u8; shape.numel() * DType::F16.byte_size()];
        Ok(vec![Tensor::from_cpu_bytes(DType::F16, shape, bytes.into())])
    }
}

/// Loads doubling models, except on `fail_on`.
#[derive(Default)]
pub struct StubBackend {
    pub fail_on: Option<Device>,
    pub loads: Mutex<Vec<Device>>,
}

impl StubBackend {
    pub fn failing_on(device: Device) -> Self {
        Self {
            fail_on: Some(device),
            ..Self::default()
        }
    }

    pub fn loads(&self) -> Vec<Device> {
        self.loads.lock().unwrap().clone()
    }
}

impl Backend for StubBackend {
    type Model = ScaleModel;

    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&self, _artifact: &ModelArtifact, device: Device) -> Result<ScaleModel> {
        if self.fail_on == Some(device) {
            bail!("no such device: {device}");
        }
        self.loads.lock().unwrap().push(device);
        Ok(ScaleModel::new(2.0))
    }
}

pub fn loaded(device: Device, model: impl BackendModel) -> Arc<LoadedModel> {
    Arc::new(LoadedModel::new(device, Box::new(model)))
}

pub fn f32_pool() -> InputPool {
    InputPool::from_sets(vec![
        vec![Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0])],
        vec![Tensor::from_f32(Shape::from_slice(&[2]), &[3.0, 4.0])],
    ])
}

/// Echo adapter: runs each job on its own thread and returns the inputs as
/// outputs. Jobs listed in `reject` fail synchronously.
#[derive(Default)]
pub struct EchoAdapter {
    pub reject: HashSet<u64>,
    pub submitted: Mutex<Vec<u64>>,
    pub work: Duration,
}

impl EchoAdapter {
    pub fn rejecting(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            reject: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<u64> {
        self.submitted.lock().unwrap().clone()
    }
}

impl SubmissionAdapter for EchoAdapter {
    fn submit(&self, job: JobHandle) -> Result<(), SubmitError> {
        job.stamp(Stage::BeforeSubmit);
        self.submitted.lock().unwrap().push(job.id());
        if self.reject.contains(&job.id()) {
            return Err(SubmitError::NoDevice);
        }

        let work = self.work;
        thread::spawn(move || {
            job.stamp(Stage::CodeletStart);
            job.stamp(Stage::CodeletEnd);
            job.stamp(Stage::InferenceStart);
            thread::sleep(work);
            job.stamp(Stage::CallbackStart);
            job.stamp(Stage::CallbackEnd);
            let latency_ms = job.elapsed_ms();
            job.complete(Ok(JobOutput {
                outputs: job.inputs().to_vec(),
                latency_ms,
            }));
        });
        Ok(())
    }
}
