use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::{DType, Shape};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

#[derive(Clone, Debug)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    pub rank: usize,
    pub dims: Vec<Option<usize>>, // None = dynamic
}

#[derive(Clone, Debug)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// Declared layout of one model input, as given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl fmt::Display for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dtype, self.shape)
    }
}

impl FromStr for InputSpec {
    type Err = anyhow::Error;

    /// Parses `dtype:shape`, e.g. `f32:1x3x224x224`.
    fn from_str(raw: &str) -> Result<Self> {
        let (dtype, shape) = raw
            .split_once(':')
            .with_context(|| format!("invalid input spec {raw:?} (expected dtype:shape)"))?;
        Ok(Self {
            dtype: dtype.parse()?,
            shape: shape.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_spec() {
        let spec: InputSpec = "f32:1x3x8x8".parse().unwrap();
        assert_eq!(spec.dtype, DType::F32);
        assert_eq!(spec.shape.dims(), &[1, 3, 8, 8]);
        assert_eq!(spec.to_string(), "f32:1x3x8x8");

        assert!("1x3".parse::<InputSpec>().is_err());
        assert!("f99:1x3".parse::<InputSpec>().is_err());
        assert!("f32:0x3".parse::<InputSpec>().is_err());
    }
}
