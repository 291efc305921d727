use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use benchport_core::{Backend, BackendModel, Device, ModelArtifact, ModelSpec, Tensor};
use tracing::info;

use crate::config::RuntimeConfig;
use crate::job::lock;

/// One model replica bound to a device.
pub struct LoadedModel {
    pub device: Device,
    spec: ModelSpec,
    model: Mutex<Box<dyn BackendModel>>,
}

impl LoadedModel {
    pub fn new(device: Device, model: Box<dyn BackendModel>) -> Self {
        Self {
            device,
            spec: model.spec().clone(),
            model: Mutex::new(model),
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn infer(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        lock(&self.model).infer(inputs)
    }
}

/// The CPU module plus one replica per requested accelerator.
///
/// Built once before the run; `accelerators[i]` serves `device_ids[i]`.
pub struct ModelSet {
    cpu: Arc<LoadedModel>,
    accelerators: Vec<Arc<LoadedModel>>,
}

impl ModelSet {
    pub fn new(cpu: Arc<LoadedModel>, accelerators: Vec<Arc<LoadedModel>>) -> Self {
        Self { cpu, accelerators }
    }

    pub fn load<B: Backend>(backend: &B, config: &RuntimeConfig) -> Result<Self> {
        let artifact = ModelArtifact::OnnxPath(config.model_path.clone());

        let cpu = backend
            .load(&artifact, Device::Cpu)
            .with_context(|| format!("failed to load model {}", artifact.path().display()))?;
        let cpu = Arc::new(LoadedModel::new(Device::Cpu, Box::new(cpu)));
        info!(backend = backend.name(), path = %artifact.path().display(), "model loaded on cpu");

        let mut accelerators = Vec::new();
        if config.use_cuda {
            for &device_id in &config.device_ids {
                let device = Device::Cuda { device_id };
                let replica = backend
                    .load(&artifact, device)
                    .with_context(|| format!("failed to replicate model to {device}"))?;
                accelerators.push(Arc::new(LoadedModel::new(device, Box::new(replica))));
                info!(%device, "model replicated");
            }
        }

        Ok(Self { cpu, accelerators })
    }

    pub fn cpu(&self) -> &Arc<LoadedModel> {
        &self.cpu
    }

    pub fn accelerators(&self) -> &[Arc<LoadedModel>] {
        &self.accelerators
    }

    pub fn accelerator(&self, device_id: u32) -> Option<&Arc<LoadedModel>> {
        self.accelerators
            .iter()
            .find(|m| m.device.device_id() == Some(device_id))
    }

    /// Replicas for every device the engine should run on, CPU first.
    pub fn for_config(&self, config: &RuntimeConfig) -> Result<Vec<Arc<LoadedModel>>> {
        config
            .devices()
            .into_iter()
            .map(|device| match device {
                Device::Cpu => Ok(self.cpu.clone()),
                Device::Cuda { device_id } => self
                    .accelerator(device_id)
                    .cloned()
                    .with_context(|| format!("no replica loaded for {device}")),
            })
            .collect()
    }
}
