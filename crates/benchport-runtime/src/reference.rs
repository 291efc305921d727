use anyhow::{bail, ensure, Context, Result};
use benchport_core::{DType, Tensor};
use tracing::info;

use crate::models::LoadedModel;

/// Runs `inputs` through the CPU module to obtain the reference outputs.
///
/// Fails when the model yields no tensor output or an output the validator
/// cannot compare; both abort the run before the pipeline starts.
pub fn run_reference(model: &LoadedModel, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let outputs = model
        .infer(inputs.to_vec())
        .context("reference inference failed")?;
    ensure!(!outputs.is_empty(), "unsupported model output: no tensor outputs");

    for (idx, out) in outputs.iter().enumerate() {
        if out.dtype() == DType::F16 {
            bail!("unsupported model output {idx}: f16 tensors cannot be validated");
        }
        out.check_len()
            .with_context(|| format!("reference output {idx} is malformed"))?;
    }

    info!(
        outputs = outputs.len(),
        shapes = %outputs.iter().map(|t| t.shape().to_string()).collect::<Vec<_>>().join(", "),
        "reference outputs computed"
    );
    Ok(outputs)
}

pub fn output_types(outputs: &[Tensor]) -> Vec<DType> {
    outputs.iter().map(Tensor::dtype).collect()
}
