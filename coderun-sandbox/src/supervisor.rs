//! Deadline enforcement around the execution worker
//!
//! The worker runs on tokio's blocking pool so that a snippet which never
//! yields cannot stall the caller. When the deadline passes the supervisor
//! fires the worker's [`AbortSignal`] and waits a bounded grace period for it
//! to unwind, which is when the worker restores its ambient state. Only then
//! is the timeout reported.

use crate::error::{Result, SandboxError};
use crate::runtime::AbortSignal;
use crate::types::PartialResult;
use std::time::Duration;
use tokio::task::JoinError;

#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    termination_grace: Duration,
}

impl TimeoutSupervisor {
    pub fn new(termination_grace: Duration) -> Self {
        Self { termination_grace }
    }

    /// Run `job` with a deadline of `timeout_secs`.
    ///
    /// A job that finishes in time has its result returned unchanged. A job
    /// that overruns is aborted and the synthetic timeout result is returned
    /// once it has stopped.
    pub async fn run_bounded<F>(&self, timeout_secs: f64, job: F) -> Result<PartialResult>
    where
        F: FnOnce(AbortSignal) -> Result<PartialResult> + Send + 'static,
    {
        let deadline = Duration::try_from_secs_f64(timeout_secs).map_err(|err| {
            SandboxError::invalid(format!("Invalid timeout {}: {}", timeout_secs, err))
        })?;

        let abort = AbortSignal::new();
        let worker_abort = abort.clone();
        let mut handle = tokio::task::spawn_blocking(move || job(worker_abort));

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(joined) => joined.map_err(worker_failure)?,
            Err(_) => {
                tracing::warn!(timeout_secs, "Execution deadline elapsed, aborting worker");
                abort.abort();

                match tokio::time::timeout(self.termination_grace, &mut handle).await {
                    Ok(Ok(Ok(_discarded))) => Ok(PartialResult::timed_out(timeout_secs)),
                    // The core failed while unwinding; that outranks the timeout.
                    Ok(Ok(Err(err))) => Err(err),
                    Ok(Err(join_err)) => Err(worker_failure(join_err)),
                    Err(_) => {
                        tracing::error!(
                            grace_ms = self.termination_grace.as_millis() as u64,
                            "Worker did not stop after abort"
                        );
                        Err(SandboxError::internal(
                            "execution worker did not stop after the deadline",
                        ))
                    }
                }
            }
        }
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new(crate::limits::ResourceLimits::default().termination_grace)
    }
}

fn worker_failure(err: JoinError) -> SandboxError {
    if err.is_panic() {
        tracing::error!("Execution worker panicked");
        SandboxError::internal("execution worker panicked")
    } else {
        SandboxError::internal(format!("execution worker was cancelled: {}", err))
    }
}
