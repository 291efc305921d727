use anyhow::{ensure, Context, Result};
use benchport_core::Tensor;
use tracing::{debug, warn};

use crate::completion::InferenceResult;
use crate::models::LoadedModel;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub passed: usize,
    pub mismatched: usize,
    pub skipped: usize,
}

impl ValidationSummary {
    pub fn all_passed(&self) -> bool {
        self.mismatched == 0
    }
}

/// Checks device outputs against a CPU rerun of the same inputs.
#[derive(Clone, Copy, Debug)]
pub struct Validator {
    pub rtol: f64,
    pub atol: f64,
}

impl Validator {
    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    /// Element-wise `|actual - expected| <= atol + rtol * |expected|`, after
    /// matching count, dtype and shape.
    pub fn compare(&self, actual: &[Tensor], expected: &[Tensor]) -> Result<()> {
        ensure!(
            actual.len() == expected.len(),
            "expected {} outputs, got {}",
            expected.len(),
            actual.len()
        );

        for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
            ensure!(
                a.dtype() == e.dtype(),
                "output {idx}: dtype {} differs from reference {}",
                a.dtype(),
                e.dtype()
            );
            ensure!(
                a.shape() == e.shape(),
                "output {idx}: shape {} differs from reference {}",
                a.shape(),
                e.shape()
            );

            let av = a.to_f64_vec().with_context(|| format!("output {idx}"))?;
            let ev = e.to_f64_vec().with_context(|| format!("reference {idx}"))?;
            if let Some((pos, (x, y))) = av
                .iter()
                .zip(&ev)
                .enumerate()
                .find(|(_, (x, y))| !self.within(**x, **y))
            {
                anyhow::bail!("output {idx}: element {pos} is {x}, reference {y}");
            }
        }
        Ok(())
    }

    /// NaN on either side is a mismatch unless both are NaN.
    fn within(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }

    /// Reruns `result.inputs` on the CPU module and compares.
    pub fn validate(&self, result: &InferenceResult, reference: &LoadedModel) -> Result<()> {
        let expected = reference
            .infer(result.inputs.clone())
            .context("reference rerun failed")?;
        self.compare(&result.outputs, &expected)
    }

    pub fn validate_all(
        &self,
        results: &[InferenceResult],
        reference: &LoadedModel,
    ) -> ValidationSummary {
        let mut summary = ValidationSummary::default();
        for result in results {
            if result.is_failed() {
                summary.skipped += 1;
                continue;
            }
            summary.checked += 1;
            match self.validate(result, reference) {
                Ok(()) => {
                    summary.passed += 1;
                    debug!(job_id = result.job_id, "output validated");
                }
                Err(err) => {
                    summary.mismatched += 1;
                    warn!(job_id = result.job_id, device = ?result.device, error = ?err, "output mismatch");
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use benchport_core::Shape;

    use super::*;

    fn f32s(data: &[f32]) -> Tensor {
        Tensor::from_f32(Shape::from_slice(&[data.len()]), data)
    }

    #[test]
    fn accepts_values_within_tolerance() {
        let v = Validator::new(1e-3, 1e-5);
        assert!(v.compare(&[f32s(&[1.0, 2.0])], &[f32s(&[1.0005, 2.0])]).is_ok());
        assert!(v.compare(&[f32s(&[1.0, 2.1])], &[f32s(&[1.0, 2.0])]).is_err());
    }

    #[test]
    fn nan_never_matches_a_finite_value() {
        let v = Validator::new(1e-3, 1e-5);
        assert!(v.compare(&[f32s(&[f32::NAN])], &[f32s(&[1.0])]).is_err());
        assert!(v.compare(&[f32s(&[1.0])], &[f32s(&[f32::NAN])]).is_err());
        assert!(v.compare(&[f32s(&[f32::NAN])], &[f32s(&[f32::NAN])]).is_ok());
    }

    #[test]
    fn rejects_layout_mismatches() {
        let v = Validator::new(1e-3, 1e-5);
        assert!(v.compare(&[], &[f32s(&[1.0])]).is_err());
        assert!(v.compare(&[f32s(&[1.0, 1.0])], &[f32s(&[1.0])]).is_err());

        let ints = Tensor::from_i32(Shape::from_slice(&[1]), &[1]);
        assert!(v.compare(&[ints], &[f32s(&[1.0])]).is_err());
    }
}
