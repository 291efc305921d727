mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use benchport_core::{DType, Device, Shape, Tensor};
use benchport_runtime::{
    completion_callback, CompletionTracker, DeviceEngine, Job, ModelSet, Pipeline,
    ResultCollector, RuntimeConfig, SchedulerPolicy, SubmissionAdapter, SubmitError,
    FAILED_LATENCY_MS,
};
use support::{f32_pool, f32_spec, loaded, BrokenModel, ScaleModel, SilentModel};

const OUT: &[DType] = &[DType::F32];

fn tracked_job(
    id: u64,
    inputs: Vec<Tensor>,
    results: &Arc<ResultCollector>,
    tracker: &Arc<CompletionTracker>,
) -> benchport_runtime::JobHandle {
    let job = Job::new(id, inputs, OUT.to_vec());
    job.set_on_complete(completion_callback(results.clone(), tracker.clone()));
    job
}

fn one_input() -> Vec<Tensor> {
    vec![Tensor::from_f32(Shape::from_slice(&[2]), &[1.0, 2.0])]
}

#[test]
fn execution_failure_resolves_as_failed() -> Result<()> {
    let engine = DeviceEngine::start(
        vec![loaded(Device::Cpu, BrokenModel(f32_spec()))],
        SchedulerPolicy::Eager,
        false,
    )?;
    let pool = f32_pool();
    let run = Pipeline::new(&engine, &pool, OUT).run(3, Duration::ZERO)?;

    assert_eq!(run.results.len(), 3);
    for result in &run.results {
        assert_eq!(result.latency_ms, FAILED_LATENCY_MS);
        assert!(result.outputs.is_empty());
        assert!(result.error.as_deref().unwrap().contains("device fault"));
        assert_eq!(result.device, Some(Device::Cpu));
    }
    Ok(())
}

#[test]
fn missing_output_is_a_failure() -> Result<()> {
    let engine = DeviceEngine::start(
        vec![loaded(Device::Cpu, SilentModel(f32_spec()))],
        SchedulerPolicy::Lws,
        false,
    )?;
    let pool = f32_pool();
    let run = Pipeline::new(&engine, &pool, OUT).run(2, Duration::ZERO)?;

    assert_eq!(run.failed(), 2);
    assert!(run.results[0].error.as_deref().unwrap().contains("no output"));
    Ok(())
}

#[test]
fn synchronous_submit_returns_after_resolution() -> Result<()> {
    let mut slow = ScaleModel::new(1.0);
    slow.delay = Duration::from_millis(20);
    let engine = DeviceEngine::start(vec![loaded(Device::Cpu, slow)], SchedulerPolicy::Eager, true)?;

    let results = Arc::new(ResultCollector::new());
    let tracker = Arc::new(CompletionTracker::new());
    for id in 0..3 {
        engine.submit(tracked_job(id, one_input(), &results, &tracker))?;
        assert_eq!(tracker.completed(), id as usize + 1);
    }
    assert_eq!(results.len(), 3);
    Ok(())
}

#[test]
fn rejects_wrong_input_count() -> Result<()> {
    let engine = DeviceEngine::start(
        vec![loaded(Device::Cpu, ScaleModel::new(1.0))],
        SchedulerPolicy::Eager,
        false,
    )?;
    let results = Arc::new(ResultCollector::new());
    let tracker = Arc::new(CompletionTracker::new());

    let mut inputs = one_input();
    inputs.extend(one_input());
    let err = engine
        .submit(tracked_job(0, inputs, &results, &tracker))
        .unwrap_err();
    assert!(matches!(err, SubmitError::MalformedInput(_)));
    assert_eq!(tracker.completed(), 0);
    Ok(())
}

#[test]
fn submit_after_shutdown_is_refused() -> Result<()> {
    let engine = DeviceEngine::start(
        vec![loaded(Device::Cpu, ScaleModel::new(1.0))],
        SchedulerPolicy::RoundRobin,
        false,
    )?;
    engine.shutdown();
    engine.shutdown();

    let results = Arc::new(ResultCollector::new());
    let tracker = Arc::new(CompletionTracker::new());
    let err = engine
        .submit(tracked_job(0, one_input(), &results, &tracker))
        .unwrap_err();
    assert!(matches!(err, SubmitError::Closed));
    Ok(())
}

#[test]
fn shutdown_drains_queued_codelets() -> Result<()> {
    let mut slow = ScaleModel::new(1.0);
    slow.delay = Duration::from_millis(5);
    let engine = DeviceEngine::start(vec![loaded(Device::Cpu, slow)], SchedulerPolicy::Lws, false)?;

    let results = Arc::new(ResultCollector::new());
    let tracker = Arc::new(CompletionTracker::new());
    for id in 0..10 {
        engine.submit(tracked_job(id, one_input(), &results, &tracker))?;
    }
    engine.shutdown();

    assert!(tracker.wait_for_timeout(10, Duration::from_secs(5)));
    assert!(results.snapshot().iter().all(|r| !r.is_failed()));
    Ok(())
}

#[test]
fn idle_workers_steal_under_lws() -> Result<()> {
    let mut slow = ScaleModel::new(1.0);
    slow.delay = Duration::from_millis(30);
    let engine = DeviceEngine::start(
        vec![
            loaded(Device::Cpu, slow),
            loaded(Device::Cuda { device_id: 0 }, ScaleModel::new(1.0)),
        ],
        SchedulerPolicy::Lws,
        false,
    )?;
    let pool = f32_pool();
    let run = Pipeline::new(&engine, &pool, OUT).run(10, Duration::ZERO)?;

    let on_fast = run
        .results
        .iter()
        .filter(|r| r.device == Some(Device::Cuda { device_id: 0 }))
        .count();
    assert!(on_fast > 5, "fast worker ran only {on_fast} of 10 jobs");
    Ok(())
}

#[test]
fn builds_workers_from_config() -> Result<()> {
    let models = ModelSet::new(
        loaded(Device::Cpu, ScaleModel::new(1.0)),
        vec![
            loaded(Device::Cuda { device_id: 0 }, ScaleModel::new(1.0)),
            loaded(Device::Cuda { device_id: 3 }, ScaleModel::new(1.0)),
        ],
    );
    let config = RuntimeConfig {
        use_cuda: true,
        device_ids: vec![3],
        inputs: vec!["f32:2".parse()?],
        ..RuntimeConfig::default()
    };

    let engine = DeviceEngine::from_config(&models, &config)?;
    assert_eq!(engine.devices(), &[Device::Cpu, Device::Cuda { device_id: 3 }]);

    let missing = RuntimeConfig { device_ids: vec![7], ..config };
    assert!(DeviceEngine::from_config(&models, &missing).is_err());
    Ok(())
}

#[test]
fn engine_needs_a_device() {
    assert!(DeviceEngine::start(Vec::new(), SchedulerPolicy::Eager, false).is_err());
}
