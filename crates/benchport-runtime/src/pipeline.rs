use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use benchport_core::DType;
use tracing::{info, warn};

use crate::completion::{CompletionTracker, InferenceResult, ResultCollector};
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::inputs::InputPool;
use crate::producer::{Producer, ProducerReport};
use crate::queue::JobQueue;
use crate::submit::SubmissionAdapter;

#[derive(Debug)]
pub struct PipelineRun {
    pub results: Vec<InferenceResult>,
    pub producer: ProducerReport,
    pub dispatch: DispatchStats,
    pub wall: Duration,
}

impl PipelineRun {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Coordinator for one run: producer thread → queue → dispatcher thread →
/// adapter, then waits until every pushed job has resolved.
pub struct Pipeline<'a> {
    adapter: &'a dyn SubmissionAdapter,
    pool: &'a InputPool,
    expected_output_types: &'a [DType],
}

impl<'a> Pipeline<'a> {
    pub fn new(
        adapter: &'a dyn SubmissionAdapter,
        pool: &'a InputPool,
        expected_output_types: &'a [DType],
    ) -> Self {
        Self {
            adapter,
            pool,
            expected_output_types,
        }
    }

    pub fn run(&self, iterations: u64, delay: Duration) -> Result<PipelineRun> {
        let queue = JobQueue::new();
        let capacity = usize::try_from(iterations).unwrap_or(usize::MAX);
        let results = Arc::new(ResultCollector::with_capacity(capacity));
        let tracker = Arc::new(CompletionTracker::new());
        let started = Instant::now();

        let (producer, dispatch) = thread::scope(|scope| -> Result<_> {
            let dispatcher = Dispatcher::new(&queue, self.adapter, results.clone(), tracker.clone());
            let dispatcher = thread::Builder::new()
                .name("benchport-dispatcher".to_string())
                .spawn_scoped(scope, move || dispatcher.run())
                .context("failed to spawn dispatcher")?;

            let producer = Producer::new(
                &queue,
                self.pool,
                self.expected_output_types,
                iterations,
                delay,
            );
            let producer = match thread::Builder::new()
                .name("benchport-producer".to_string())
                .spawn_scoped(scope, move || producer.run(&mut rand::thread_rng()))
            {
                Ok(handle) => handle,
                Err(err) => {
                    queue.shutdown();
                    return Err(err).context("failed to spawn producer");
                }
            };

            let produced = producer.join();
            if produced.is_err() {
                queue.shutdown();
            }
            // The dispatcher exits once it has drained the closed queue, so
            // its counts cover every job that was pushed.
            let dispatch = dispatcher
                .join()
                .map_err(|_| anyhow!("dispatcher panicked"))?;

            let expected = (dispatch.dispatched + dispatch.rejected) as usize;
            tracker.wait_for(expected);

            let producer = produced.map_err(|_| anyhow!("producer panicked"))??;
            Ok((producer, dispatch))
        })?;

        let results = results.take();
        let wall = started.elapsed();
        info!(
            jobs = results.len(),
            wall_ms = wall.as_millis() as u64,
            "pipeline run complete"
        );
        Ok(PipelineRun {
            results,
            producer,
            dispatch,
            wall,
        })
    }
}

/// Pushes `jobs` unpaced jobs through the adapter and discards the results.
pub fn run_warmup(
    adapter: &dyn SubmissionAdapter,
    pool: &InputPool,
    expected_output_types: &[DType],
    jobs: u64,
) -> Result<()> {
    if jobs == 0 {
        return Ok(());
    }
    info!(jobs, "starting warmup");
    let run = Pipeline::new(adapter, pool, expected_output_types)
        .run(jobs, Duration::ZERO)
        .context("warmup failed")?;

    let failed = run.failed();
    if failed > 0 {
        warn!(failed, jobs, "warmup jobs failed");
    }
    info!(wall_ms = run.wall.as_millis() as u64, "warmup complete");
    Ok(())
}
