use anyhow::{bail, Context, Result};
use benchport_core::{
    Backend, BackendModel, DType, Device, IOName, ModelArtifact, ModelSpec, Shape, Tensor,
    TensorSpec,
};
use ort::{
    session::{builder::SessionBuilder, Session, SessionInputValue},
    tensor::TensorElementType,
    value::{DynValue, ValueType},
};
use tracing::debug;

pub struct OrtBackend;

impl OrtBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrtModel {
    spec: ModelSpec,
    session: Session,
    input_names: Vec<String>,
}

impl Backend for OrtBackend {
    type Model = OrtModel;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn load(&self, artifact: &ModelArtifact, device: Device) -> Result<Self::Model> {
        let ModelArtifact::OnnxPath(path) = artifact;

        let builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .context("failed to configure ORT session builder")?;
        let builder = configure_device(builder, device)?;

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        let input_names = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();
        let spec = model_spec(&session)?;
        debug!(%device, inputs = spec.inputs.len(), outputs = spec.outputs.len(), "ORT session ready");

        Ok(OrtModel {
            spec,
            session,
            input_names,
        })
    }
}

impl BackendModel for OrtModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        anyhow::ensure!(
            inputs.len() == self.input_names.len(),
            "expected {} inputs, got {}",
            self.input_names.len(),
            inputs.len()
        );

        let mut ort_inputs = Vec::with_capacity(inputs.len());
        for (name, input) in self.input_names.iter().zip(inputs) {
            ort_inputs.push((name.clone(), SessionInputValue::from(to_ort_value(&input)?)));
        }

        let outputs = self.session.run(ort_inputs)?;
        outputs
            .iter()
            .map(|(_, value)| from_ort_value(&value))
            .collect()
    }
}

fn model_spec(session: &Session) -> Result<ModelSpec> {
    let inputs = session
        .inputs
        .iter()
        .map(|input| tensor_spec(&input.name, &input.input_type))
        .collect::<Result<Vec<_>>>()?;
    let outputs = session
        .outputs
        .iter()
        .map(|output| tensor_spec(&output.name, &output.output_type))
        .collect::<Result<Vec<_>>>()?;
    Ok(ModelSpec { inputs, outputs })
}

fn configure_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda { device_id } => configure_cuda(builder, device_id),
    }
}

fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::cuda::CUDAExecutionProvider;
        let ep = CUDAExecutionProvider::default()
            .with_device_id(device_id as i32)
            .build();
        builder
            .with_execution_providers([ep])
            .with_context(|| format!("failed to enable CUDA execution provider on cuda:{device_id}"))
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = (builder, device_id);
        bail!("CUDA requested but benchport was built without the `cuda` feature")
    }
}

fn tensor_spec(name: &str, value_type: &ValueType) -> Result<TensorSpec> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("unsupported non-tensor IO value {name}");
    };

    let dims = shape
        .iter()
        .map(|d| if *d < 0 { None } else { Some(*d as usize) })
        .collect::<Vec<_>>();

    Ok(TensorSpec {
        name: IOName(name.to_string()),
        dtype: to_dtype(*ty)?,
        rank: shape.len(),
        dims,
    })
}

fn to_dtype(ty: TensorElementType) -> Result<DType> {
    match ty {
        TensorElementType::Float32 => Ok(DType::F32),
        TensorElementType::Float16 => Ok(DType::F16),
        TensorElementType::Int64 => Ok(DType::I64),
        TensorElementType::Int32 => Ok(DType::I32),
        TensorElementType::Uint8 => Ok(DType::U8),
        _ => bail!("unsupported tensor element type: {ty}"),
    }
}

fn to_ort_value(tensor: &Tensor) -> Result<DynValue> {
    let shape: Vec<usize> = tensor.shape().dims().to_vec();
    let value = match tensor.dtype() {
        DType::F32 => ort::value::Tensor::from_array((shape, tensor.to_f32_vec()?))?.into_dyn(),
        DType::I64 => ort::value::Tensor::from_array((shape, tensor.to_i64_vec()?))?.into_dyn(),
        DType::I32 => ort::value::Tensor::from_array((shape, tensor.to_i32_vec()?))?.into_dyn(),
        DType::U8 => {
            tensor.check_len()?;
            ort::value::Tensor::from_array((shape, tensor.bytes.to_vec()))?.into_dyn()
        }
        DType::F16 => bail!("f16 inputs are not supported yet"),
    };
    Ok(value)
}

fn from_ort_value(value: &ort::value::ValueRef<'_>) -> Result<Tensor> {
    let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
        bail!("non-tensor outputs are not supported");
    };
    let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
    let shape = Shape::from_slice(&dims);

    match *ty {
        TensorElementType::Float32 => {
            let array = value.try_extract_array::<f32>()?;
            let data: Vec<f32> = array.iter().copied().collect();
            Ok(Tensor::from_f32(shape, &data))
        }
        TensorElementType::Int64 => {
            let array = value.try_extract_array::<i64>()?;
            let data: Vec<i64> = array.iter().copied().collect();
            Ok(Tensor::from_i64(shape, &data))
        }
        TensorElementType::Int32 => {
            let array = value.try_extract_array::<i32>()?;
            let data: Vec<i32> = array.iter().copied().collect();
            Ok(Tensor::from_i32(shape, &data))
        }
        TensorElementType::Uint8 => {
            let array = value.try_extract_array::<u8>()?;
            let data: Vec<u8> = array.iter().copied().collect();
            Ok(Tensor::from_u8(shape, &data))
        }
        TensorElementType::Float16 => bail!("f16 outputs are not supported yet"),
        _ => bail!("unsupported output tensor element type: {ty}"),
    }
}
