use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda { device_id: u32 },
}

impl Device {
    /// Accelerator index, `None` for the host.
    pub fn device_id(&self) -> Option<u32> {
        match self {
            Device::Cpu => None,
            Device::Cuda { device_id } => Some(*device_id),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        if raw.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }

        if let Some(rest) = raw.strip_prefix("cuda:") {
            let device_id: u32 = rest.parse().context("invalid cuda device id")?;
            return Ok(Device::Cuda { device_id });
        }

        bail!("unsupported device: {raw} (expected cpu or cuda:N)");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U8 => "u8",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "f32" | "float" | "float32" => Ok(DType::F32),
            "f16" | "half" | "float16" => Ok(DType::F16),
            "i64" | "long" | "int64" => Ok(DType::I64),
            "i32" | "int" | "int32" => Ok(DType::I32),
            "u8" | "uint8" | "byte" => Ok(DType::U8),
            other => bail!("unsupported dtype: {other}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        f.write_str(&dims.join("x"))
    }
}

impl FromStr for Shape {
    type Err = anyhow::Error;

    /// Parses `1x3x224x224` (commas are accepted as separators too).
    fn from_str(raw: &str) -> Result<Self> {
        let dims = raw
            .split(['x', ','])
            .map(|d| {
                d.trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid dimension {d:?} in shape {raw:?}"))
            })
            .collect::<Result<SmallVec<[usize; 6]>>>()?;
        ensure!(!dims.is_empty(), "empty shape");
        ensure!(
            dims.iter().all(|&d| d > 0),
            "zero-sized dimension in shape {raw:?}"
        );
        Ok(Self(dims))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    pub device: Device,
}

/// Host-resident tensor. Storage is reference counted, so clones are cheap
/// and jobs can share one pregenerated input set.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub bytes: Bytes,
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, bytes: Bytes) -> Self {
        Self {
            desc: TensorDesc {
                dtype,
                shape,
                device: Device::Cpu,
            },
            bytes,
        }
    }

    pub fn from_f32(shape: Shape, data: &[f32]) -> Self {
        Self::from_cpu_bytes(DType::F32, shape, le_bytes(data, |v| v.to_le_bytes()))
    }

    pub fn from_i64(shape: Shape, data: &[i64]) -> Self {
        Self::from_cpu_bytes(DType::I64, shape, le_bytes(data, |v| v.to_le_bytes()))
    }

    pub fn from_i32(shape: Shape, data: &[i32]) -> Self {
        Self::from_cpu_bytes(DType::I32, shape, le_bytes(data, |v| v.to_le_bytes()))
    }

    pub fn from_u8(shape: Shape, data: &[u8]) -> Self {
        Self::from_cpu_bytes(DType::U8, shape, Bytes::copy_from_slice(data))
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Checks that the storage length matches `numel * dtype size`.
    pub fn check_len(&self) -> Result<()> {
        let expected = self.desc.shape.numel() * self.desc.dtype.byte_size();
        ensure!(
            self.bytes.len() == expected,
            "tensor byte size mismatch: got {}, expected {}",
            self.bytes.len(),
            expected
        );
        Ok(())
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        ensure!(self.dtype() == DType::F32, "expected f32 tensor, got {}", self.dtype());
        self.check_len()?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        ensure!(self.dtype() == DType::I64, "expected i64 tensor, got {}", self.dtype());
        self.check_len()?;
        Ok(self
            .bytes
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }

    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        ensure!(self.dtype() == DType::I32, "expected i32 tensor, got {}", self.dtype());
        self.check_len()?;
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Widens every element to f64 for numeric comparison.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match self.dtype() {
            DType::F32 => Ok(self.to_f32_vec()?.into_iter().map(f64::from).collect()),
            DType::I64 => Ok(self.to_i64_vec()?.into_iter().map(|v| v as f64).collect()),
            DType::I32 => Ok(self.to_i32_vec()?.into_iter().map(f64::from).collect()),
            DType::U8 => {
                self.check_len()?;
                Ok(self.bytes.iter().map(|&v| f64::from(v)).collect())
            }
            DType::F16 => bail!("f16 tensors are not supported yet"),
        }
    }
}

fn le_bytes<T: Copy, const N: usize>(data: &[T], to_le: impl Fn(T) -> [u8; N]) -> Bytes {
    let mut out = Vec::with_capacity(data.len() * N);
    for &v in data {
        out.extend_from_slice(&to_le(v));
    }
    Bytes::from(out)
}
