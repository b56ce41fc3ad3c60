//! Execution identity, lifecycle phases and result assembly

use crate::error::{Result, SandboxError};
use crate::types::{ExecutionResult, PartialResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one request.
///
/// ```text
/// Accepted -> StateApplied -> Executing -> {Completed | TimedOut | Failed}
///          -> StateRestored -> ResultAssembled
/// ```
///
/// `StateRestored` is reachable only through `StateApplied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Accepted,
    StateApplied,
    Executing,
    Completed,
    TimedOut,
    Failed,
    StateRestored,
    ResultAssembled,
}

impl ExecutionPhase {
    pub fn can_advance_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (Accepted, StateApplied)
                | (StateApplied, Executing)
                | (Executing, Completed | TimedOut | Failed)
                | (Completed | TimedOut | Failed, StateRestored)
                | (StateRestored, ResultAssembled)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutionPhase::ResultAssembled
    }
}

/// Shared view of one execution's phase; clones observe the same phase so
/// the worker thread and the service can both advance it.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    id: ExecutionId,
    phase: Arc<Mutex<ExecutionPhase>>,
}

impl PhaseTracker {
    pub fn new(id: ExecutionId) -> Self {
        Self {
            id,
            phase: Arc::new(Mutex::new(ExecutionPhase::Accepted)),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn advance(&self, next: ExecutionPhase) -> Result<()> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !phase.can_advance_to(next) {
            return Err(SandboxError::internal(format!(
                "invalid execution phase transition {:?} -> {:?}",
                *phase, next
            )));
        }
        tracing::debug!(
            execution_id = %self.id,
            from = ?*phase,
            to = ?next,
            "Execution phase"
        );
        *phase = next;
        Ok(())
    }
}

/// Attach timing to a worker or supervisor outcome.
///
/// `accepted` is the instant the request was accepted; the elapsed time is
/// reported in whole milliseconds.
pub fn assemble(partial: PartialResult, accepted: Instant) -> ExecutionResult {
    let elapsed = accepted.elapsed();
    ExecutionResult {
        stdout: partial.stdout,
        stderr: partial.stderr,
        exit_code: partial.exit_code,
        error: partial.error,
        execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}
