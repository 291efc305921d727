use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, ensure, Result};
use benchport_core::{Device, InputSpec};

/// How the device engine places codelets on workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// One shared queue; any idle worker takes the head.
    Eager,
    /// Codelet `k` goes to worker `k mod n`.
    RoundRobin,
    /// Round-robin placement; idle workers steal from the longest queue.
    #[default]
    Lws,
}

impl SchedulerPolicy {
    pub fn name(self) -> &'static str {
        match self {
            SchedulerPolicy::Eager => "eager",
            SchedulerPolicy::RoundRobin => "round-robin",
            SchedulerPolicy::Lws => "lws",
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "eager" => Ok(SchedulerPolicy::Eager),
            "round-robin" | "rr" => Ok(SchedulerPolicy::RoundRobin),
            "lws" => Ok(SchedulerPolicy::Lws),
            other => bail!("unknown scheduler policy: {other} (expected eager, round-robin or lws)"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    #[default]
    Info,
    Stats,
    Debug,
    Trace,
}

impl Verbosity {
    /// `EnvFilter` directive for this level. Per-job statistics are logged
    /// under the `benchport::stats` target.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Silent => "off",
            Verbosity::Info => "info,benchport::stats=off",
            Verbosity::Stats => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

impl FromStr for Verbosity {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "0" | "silent" => Ok(Verbosity::Silent),
            "1" | "info" => Ok(Verbosity::Info),
            "2" | "stats" => Ok(Verbosity::Stats),
            "3" | "debug" => Ok(Verbosity::Debug),
            "4" | "trace" => Ok(Verbosity::Trace),
            other => bail!("unknown verbosity: {other}"),
        }
    }
}

/// Run configuration. Built once at startup and only ever read afterwards.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerPolicy,
    pub model_path: PathBuf,
    pub iterations: u64,
    pub synchronous: bool,
    pub delay: Duration,
    pub use_cpu: bool,
    pub use_cuda: bool,
    pub device_ids: Vec<u32>,
    pub verbosity: Verbosity,
    pub inputs: Vec<InputSpec>,
    pub warmup_iterations: u64,
    pub pool_size: usize,
    pub rtol: f64,
    pub atol: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerPolicy::default(),
            model_path: PathBuf::new(),
            iterations: 1,
            synchronous: false,
            delay: Duration::ZERO,
            use_cpu: true,
            use_cuda: false,
            device_ids: Vec::new(),
            verbosity: Verbosity::default(),
            inputs: Vec::new(),
            warmup_iterations: 2,
            pool_size: crate::inputs::DEFAULT_POOL_SIZE,
            rtol: 1e-3,
            atol: 1e-5,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.use_cpu || self.use_cuda,
            "no device enabled (enable cpu and/or cuda)"
        );
        ensure!(
            !self.use_cuda || !self.device_ids.is_empty(),
            "cuda enabled but no device ids given"
        );
        ensure!(!self.inputs.is_empty(), "at least one model input must be declared");
        ensure!(self.pool_size > 0, "input pool size must be positive");
        ensure!(
            self.rtol >= 0.0 && self.atol >= 0.0,
            "tolerances must be non-negative"
        );

        let mut ids = self.device_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ensure!(ids.len() == self.device_ids.len(), "duplicate device ids");
        Ok(())
    }

    /// Devices the engine will run workers on, CPU first.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices = Vec::new();
        if self.use_cpu {
            devices.push(Device::Cpu);
        }
        if self.use_cuda {
            devices.extend(
                self.device_ids
                    .iter()
                    .map(|&device_id| Device::Cuda { device_id }),
            );
        }
        devices
    }
}
