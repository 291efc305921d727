use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use benchport_core::DType;
use rand::Rng;
use tracing::{debug, info};

use crate::inputs::InputPool;
use crate::job::Job;
use crate::queue::JobQueue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProducerReport {
    pub pushed: u64,
    pub elapsed: Duration,
}

/// Pushes a fixed number of jobs at a paced rate, then closes the queue.
pub struct Producer<'a> {
    queue: &'a JobQueue,
    pool: &'a InputPool,
    expected_output_types: &'a [DType],
    iterations: u64,
    delay: Duration,
}

impl<'a> Producer<'a> {
    pub fn new(
        queue: &'a JobQueue,
        pool: &'a InputPool,
        expected_output_types: &'a [DType],
        iterations: u64,
        delay: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            expected_output_types,
            iterations,
            delay,
        }
    }

    /// Runs to completion. The queue is shut down on every exit path, so
    /// the dispatcher always terminates; `pushed` in the error message is
    /// the number of jobs already in flight.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ProducerReport> {
        let started = Instant::now();
        let mut pushed = 0;
        let outcome = self.produce(rng, &mut pushed);
        self.queue.shutdown();

        let elapsed = started.elapsed();
        outcome.with_context(|| format!("producer stopped after {pushed} jobs"))?;
        info!(pushed, elapsed_ms = elapsed.as_millis() as u64, "producer finished");
        Ok(ProducerReport { pushed, elapsed })
    }

    fn produce<R: Rng + ?Sized>(&self, rng: &mut R, pushed: &mut u64) -> Result<()> {
        for job_id in 0..self.iterations {
            let inputs = self
                .pool
                .pick(rng)
                .ok_or_else(|| anyhow!("input pool is empty"))?;
            let job = Job::new(job_id, inputs.to_vec(), self.expected_output_types.to_vec());

            self.queue.push(job).map_err(|err| anyhow!(err))?;
            *pushed += 1;
            debug!(job_id, total = self.iterations, "job enqueued");

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
        }
        Ok(())
    }
}
