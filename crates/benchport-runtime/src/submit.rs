use thiserror::Error;

use crate::job::JobHandle;

/// Errors raised synchronously by [`SubmissionAdapter::submit`].
#[derive(Clone, Debug, Error)]
pub enum SubmitError {
    #[error("no device available")]
    NoDevice,
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("engine is shut down")]
    Closed,
}

/// Hands one job to an execution engine.
///
/// On `Ok`, the implementation owns the job's resolution: it stamps every
/// stage from `before_submit` on and calls [`Job::complete`](crate::Job::complete)
/// exactly once, typically from a thread it owns. On `Err`, the caller resolves the job.
pub trait SubmissionAdapter: Send + Sync {
    fn submit(&self, job: JobHandle) -> Result<(), SubmitError>;
}
