use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use benchport_backend_ort::OrtBackend;
use benchport_core::{Backend, BackendModel, DType, Device, ModelArtifact, Shape, Tensor};

#[test]
#[ignore = "requires models/identity.onnx"]
fn ort_identity_cpu() -> Result<()> {
    let model_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../models/identity.onnx");

    let backend = OrtBackend::new();
    let mut model = backend.load(&ModelArtifact::OnnxPath(model_path), Device::Cpu)?;
    let spec = model.spec();

    let input_spec = spec.inputs.first().context("missing model input spec")?;
    ensure!(input_spec.dtype == DType::F32, "expected f32 identity model");

    let mut shape = input_spec
        .dims
        .iter()
        .map(|d| d.unwrap_or(3))
        .collect::<Vec<_>>();
    if shape.is_empty() {
        shape.push(3);
    }

    let numel = shape.iter().product::<usize>().max(1);
    let data: Vec<f32> = (0..numel).map(|i| i as f32).collect();
    let input = Tensor::from_f32(Shape::from_slice(&shape), &data);

    let outputs = model.infer(vec![input])?;
    let out = outputs.first().context("missing model output")?;
    assert_eq!(out.to_f32_vec()?, data);

    Ok(())
}

#[test]
fn missing_model_file_fails_to_load() {
    let backend = OrtBackend::new();
    let artifact = ModelArtifact::OnnxPath(PathBuf::from("does/not/exist.onnx"));
    assert!(backend.load(&artifact, Device::Cpu).is_err());
}

#[cfg(not(feature = "cuda"))]
#[test]
fn cuda_requires_feature() {
    let backend = OrtBackend::new();
    let artifact = ModelArtifact::OnnxPath(PathBuf::from("does/not/exist.onnx"));
    let err = backend
        .load(&artifact, Device::Cuda { device_id: 0 })
        .err()
        .expect("cuda load must fail without the feature");
    assert!(format!("{err:#}").contains("cuda"));
}
