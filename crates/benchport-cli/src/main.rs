mod cli;

use anyhow::{Context, Result};
use benchport_backend_ort::OrtBackend;
use benchport_runtime::{
    generate_inputs, log_job_breakdowns, output_types, run_reference, run_warmup, DeviceEngine,
    InputPool, ModelSet, Pipeline, Report, RuntimeConfig, Validator, Verbosity,
};
use clap::Parser;
use cli::{Cli, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = RuntimeConfig::try_from(&args)?;
            init_tracing(config.verbosity);
            run(&config, !args.no_validate)
        }
    }
}

fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(config: &RuntimeConfig, validate: bool) -> Result<()> {
    config.validate().context("invalid configuration")?;

    // ---- Setup: anything failing here aborts before the pipeline exists.
    let models = ModelSet::load(&OrtBackend::new(), config)?;
    let mut rng = rand::thread_rng();
    let probe = generate_inputs(&config.inputs, &mut rng).context("failed to generate inputs")?;
    let reference = run_reference(models.cpu(), &probe)?;
    let expected_types = output_types(&reference);
    let pool = InputPool::generate(&config.inputs, config.pool_size, &mut rng)
        .context("failed to pregenerate inputs")?;

    let engine = DeviceEngine::from_config(&models, config)?;
    let warmup_jobs = config.warmup_iterations * engine.worker_count() as u64;
    run_warmup(&engine, &pool, &expected_types, warmup_jobs)?;

    // ---- Measured run
    info!(
        iterations = config.iterations,
        delay_ms = config.delay.as_millis() as u64,
        scheduler = %config.scheduler,
        "starting inference run"
    );
    let run = Pipeline::new(&engine, &pool, &expected_types).run(config.iterations, config.delay)?;
    engine.shutdown();

    log_job_breakdowns(&run.results);
    let report = Report::from_results(&run.results, run.wall);
    print!("{report}");

    if validate {
        let summary = Validator::new(config.rtol, config.atol).validate_all(&run.results, models.cpu());
        println!(
            "validation: {} checked, {} passed, {} mismatched, {} skipped",
            summary.checked, summary.passed, summary.mismatched, summary.skipped
        );
    }
    Ok(())
}
