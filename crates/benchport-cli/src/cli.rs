use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use benchport_core::{Device, InputSpec};
use benchport_runtime::RuntimeConfig;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "benchport", version, about = "Multi-device inference latency benchmark")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the benchmark
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to ONNX model file
    #[arg(long)]
    pub model: PathBuf,

    /// Model input as dtype:shape, e.g. f32:1x3x224x224 (repeat per input)
    #[arg(long = "input", required = true)]
    pub inputs: Vec<String>,

    /// Number of measured inference jobs
    #[arg(long, default_value_t = 1)]
    pub iterations: u64,

    /// Scheduling policy (eager, round-robin or lws)
    #[arg(long, default_value = "lws")]
    pub scheduler: String,

    /// Delay between job submissions in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Block on each submission until the job has completed
    #[arg(long)]
    pub sync: bool,

    /// Accelerator to run on, as cuda:N (repeatable)
    #[arg(long = "device")]
    pub devices: Vec<String>,

    /// Do not run a worker on the CPU
    #[arg(long)]
    pub no_cpu: bool,

    /// Verbosity (silent, info, stats, debug, trace or 0-4); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    pub verbosity: String,

    /// Warmup jobs per device before the measured run
    #[arg(long, default_value_t = 2)]
    pub warmup: u64,

    /// Number of pregenerated input sets
    #[arg(long, default_value_t = benchport_runtime::DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Relative tolerance for output validation
    #[arg(long, default_value_t = 1e-3)]
    pub rtol: f64,

    /// Absolute tolerance for output validation
    #[arg(long, default_value_t = 1e-5)]
    pub atol: f64,

    /// Skip output validation against the CPU module
    #[arg(long)]
    pub no_validate: bool,
}

impl TryFrom<&RunArgs> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(args: &RunArgs) -> Result<Self> {
        let inputs = args
            .inputs
            .iter()
            .map(|raw| raw.parse::<InputSpec>())
            .collect::<Result<Vec<_>>>()?;

        let mut device_ids = Vec::new();
        for raw in &args.devices {
            match raw.parse::<Device>().with_context(|| format!("invalid --device {raw}"))? {
                Device::Cpu => {
                    bail!("--device takes accelerators only; the CPU worker runs unless --no-cpu is set")
                }
                Device::Cuda { device_id } => device_ids.push(device_id),
            }
        }

        Ok(RuntimeConfig {
            scheduler: args.scheduler.parse()?,
            model_path: args.model.clone(),
            iterations: args.iterations,
            synchronous: args.sync,
            delay: Duration::from_millis(args.delay_ms),
            use_cpu: !args.no_cpu,
            use_cuda: !device_ids.is_empty(),
            device_ids,
            verbosity: args.verbosity.parse()?,
            inputs,
            warmup_iterations: args.warmup,
            pool_size: args.pool_size,
            rtol: args.rtol,
            atol: args.atol,
        })
    }
}
