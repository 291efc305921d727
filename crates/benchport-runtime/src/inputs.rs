use anyhow::{bail, ensure, Result};
use benchport_core::{DType, InputSpec, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

/// Number of input sets generated up front for the producer to pick from.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Builds one random input set matching `specs`.
///
/// Floats are uniform in `[0, 1)`, integers in `[0, 10)`, bytes span the full range.
pub fn generate_inputs<R: Rng + ?Sized>(specs: &[InputSpec], rng: &mut R) -> Result<Vec<Tensor>> {
    ensure!(!specs.is_empty(), "no model inputs declared");

    specs
        .iter()
        .map(|spec| {
            let numel = spec.shape.numel();
            let shape = spec.shape.clone();
            let tensor = match spec.dtype {
                DType::F32 => {
                    let data: Vec<f32> = (0..numel).map(|_| rng.gen::<f32>()).collect();
                    Tensor::from_f32(shape, &data)
                }
                DType::I64 => {
                    let data: Vec<i64> = (0..numel).map(|_| rng.gen_range(0..10)).collect();
                    Tensor::from_i64(shape, &data)
                }
                DType::I32 => {
                    let data: Vec<i32> = (0..numel).map(|_| rng.gen_range(0..10)).collect();
                    Tensor::from_i32(shape, &data)
                }
                DType::U8 => {
                    let data: Vec<u8> = (0..numel).map(|_| rng.gen()).collect();
                    Tensor::from_u8(shape, &data)
                }
                DType::F16 => bail!("f16 inputs are not supported yet"),
            };
            Ok(tensor)
        })
        .collect()
}

/// Pregenerated input sets shared by every job of a run.
#[derive(Clone, Debug, Default)]
pub struct InputPool {
    sets: Vec<Vec<Tensor>>,
}

impl InputPool {
    pub fn generate<R: Rng + ?Sized>(specs: &[InputSpec], size: usize, rng: &mut R) -> Result<Self> {
        let sets = (0..size)
            .map(|_| generate_inputs(specs, rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sets })
    }

    pub fn from_sets(sets: Vec<Vec<Tensor>>) -> Self {
        Self { sets }
    }

    /// Uniformly random input set, `None` when the pool is empty.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&[Tensor]> {
        self.sets.choose(rng).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
