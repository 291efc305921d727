use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::{error, info};

use crate::completion::InferenceResult;
use crate::job::{Stage, TimingRecord};

/// Time spent in each pipeline stage for one job.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageBreakdown {
    pub queue: Duration,
    pub submit: Duration,
    pub scheduling: Duration,
    pub codelet: Duration,
    pub inference: Duration,
    pub callback: Duration,
}

impl StageBreakdown {
    pub fn from_timing(timing: &TimingRecord) -> Self {
        let span = |from, to| timing.between(from, to).unwrap_or_default();
        Self {
            queue: span(Stage::Enqueued, Stage::Dequeued),
            submit: span(Stage::Dequeued, Stage::BeforeSubmit),
            scheduling: span(Stage::BeforeSubmit, Stage::CodeletStart),
            codelet: span(Stage::CodeletStart, Stage::CodeletEnd),
            inference: span(Stage::InferenceStart, Stage::CallbackStart),
            callback: span(Stage::CallbackStart, Stage::CallbackEnd),
        }
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Logs one line per job on the `benchport::stats` target.
pub fn log_job_breakdowns(results: &[InferenceResult]) {
    for result in results {
        if result.is_failed() {
            error!(
                job_id = result.job_id,
                reason = result.error.as_deref().unwrap_or("unknown"),
                "job failed"
            );
            continue;
        }

        let b = StageBreakdown::from_timing(&result.timing);
        info!(
            target: "benchport::stats",
            "Job {} done. Latency = {:.3} ms | Queue = {:.3} ms, Submit = {:.3} ms, \
             Scheduling = {:.3} ms, Codelet = {:.3} ms, Inference = {:.3} ms, Callback = {:.3} ms",
            result.job_id,
            result.latency_ms,
            ms(b.queue),
            ms(b.submit),
            ms(b.scheduling),
            ms(b.codelet),
            ms(b.inference),
            ms(b.callback),
        );
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySummary {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    /// `None` when there is nothing to summarise.
    pub fn from_latencies(latencies: &[f64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(Self {
            min: sorted[0],
            mean,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Clone, Debug)]
pub struct Report {
    pub completed: usize,
    pub failed: usize,
    pub latency: Option<LatencySummary>,
    pub per_device: BTreeMap<String, usize>,
    pub wall: Duration,
}

impl Report {
    pub fn from_results(results: &[InferenceResult], wall: Duration) -> Self {
        let latencies: Vec<f64> = results
            .iter()
            .filter(|r| !r.is_failed())
            .map(|r| r.latency_ms)
            .collect();

        let mut per_device = BTreeMap::new();
        for result in results.iter().filter(|r| !r.is_failed()) {
            let device = result
                .device
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *per_device.entry(device).or_insert(0) += 1;
        }

        Self {
            completed: latencies.len(),
            failed: results.len() - latencies.len(),
            latency: LatencySummary::from_latencies(&latencies),
            per_device,
            wall,
        }
    }

    /// Successful jobs per second of wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.wall.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.completed as f64 / secs
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "jobs: {} completed, {} failed in {:.3} ms ({:.1} jobs/s)",
            self.completed,
            self.failed,
            ms(self.wall),
            self.throughput()
        )?;
        match &self.latency {
            Some(l) => writeln!(
                f,
                "latency ms: min {:.3} | mean {:.3} | p50 {:.3} | p95 {:.3} | p99 {:.3} | max {:.3}",
                l.min, l.mean, l.p50, l.p95, l.p99, l.max
            )?,
            None => writeln!(f, "latency ms: n/a")?,
        }
        for (device, jobs) in &self.per_device {
            writeln!(f, "  {device}: {jobs} jobs")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use benchport_core::Device;

    use super::*;

    fn result(job_id: u64, latency_ms: f64, device: Option<Device>) -> InferenceResult {
        InferenceResult {
            job_id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            latency_ms,
            device,
            device_id: device.and_then(|d| d.device_id()),
            worker_id: Some(0),
            timing: TimingRecord::default(),
            error: None,
        }
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let latencies: Vec<f64> = (1..=100).map(f64::from).collect();
        let summary = LatencySummary::from_latencies(&latencies).unwrap();
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.p50, 50.0);
        assert_eq!(summary.p95, 95.0);
        assert_eq!(summary.p99, 99.0);
        assert_eq!(summary.max, 100.0);
        assert!((summary.mean - 50.5).abs() < 1e-9);

        assert!(LatencySummary::from_latencies(&[]).is_none());
    }

    #[test]
    fn failed_jobs_are_excluded_from_latency() {
        let gpu = Device::Cuda { device_id: 1 };
        let results = vec![
            result(0, 2.0, Some(Device::Cpu)),
            result(1, -1.0, None),
            result(2, 4.0, Some(gpu)),
            result(3, 6.0, Some(gpu)),
        ];
        let report = Report::from_results(&results, Duration::from_secs(1));

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.latency.unwrap().min, 2.0);
        assert_eq!(report.per_device.get("cuda:1"), Some(&2));
        assert_eq!(report.per_device.get("cpu"), Some(&1));
        assert!((report.throughput() - 3.0).abs() < 1e-9);
        assert!(report.to_string().contains("1 failed"));
    }

    #[test]
    fn breakdown_tolerates_missing_stages() {
        let t0 = Instant::now();
        let mut timing = TimingRecord::default();
        timing.stamp_at(Stage::Enqueued, t0);
        timing.stamp_at(Stage::Dequeued, t0 + Duration::from_millis(3));

        let b = StageBreakdown::from_timing(&timing);
        assert_eq!(b.queue, Duration::from_millis(3));
        assert_eq!(b.inference, Duration::ZERO);
    }
}
