//! Sandbox service - main entry point

use crate::ambient::{validate_env_entry, AmbientStore, IsolatedStore, ProcessStore};
use crate::context::ContextBuilder;
use crate::error::{Result, SandboxError};
use crate::execution::{assemble, ExecutionId, ExecutionPhase, PhaseTracker};
use crate::limits::ResourceLimits;
use crate::runtime::Interpreter;
use crate::supervisor::TimeoutSupervisor;
use crate::types::{ExecutionRequest, ExecutionResult};
use crate::worker::{ExecutionWorker, Snippet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Serializes whole executions in [`AmbientMode::Process`]. Taken before the
/// deadline starts and released only when the worker thread exits, even if
/// the caller stopped waiting for it.
fn process_gate() -> Arc<tokio::sync::Mutex<()>> {
    static GATE: OnceLock<Arc<tokio::sync::Mutex<()>>> = OnceLock::new();
    Arc::clone(GATE.get_or_init(|| Arc::new(tokio::sync::Mutex::new(()))))
}

/// Where request environment variables and arguments are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbientMode {
    /// A private store per request; executions never contend.
    #[default]
    Isolated,
    /// The real process environment, one execution at a time.
    Process,
}

impl fmt::Display for AmbientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbientMode::Isolated => f.write_str("isolated"),
            AmbientMode::Process => f.write_str("process"),
        }
    }
}

impl FromStr for AmbientMode {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(AmbientMode::Isolated),
            "process" => Ok(AmbientMode::Process),
            other => Err(SandboxError::invalid(format!(
                "Unknown ambient mode '{}', expected 'isolated' or 'process'",
                other
            ))),
        }
    }
}

/// Anything that can run an [`ExecutionRequest`]
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult>;

    /// Name of the interpreter backend
    fn name(&self) -> &str;
}

/// Sandbox execution service
pub struct SandboxService<I: Interpreter> {
    worker: ExecutionWorker<I>,
    supervisor: TimeoutSupervisor,
    limits: ResourceLimits,
    ambient_mode: AmbientMode,
    base_env: BTreeMap<String, String>,
}

impl<I: Interpreter> SandboxService<I> {
    /// Create a new sandbox service with default limits
    pub fn new(interpreter: I) -> Self {
        Self::with_limits(interpreter, ResourceLimits::default())
    }

    pub fn with_limits(interpreter: I, limits: ResourceLimits) -> Self {
        Self {
            worker: ExecutionWorker::new(interpreter, ContextBuilder::new(limits.max_output_bytes)),
            supervisor: TimeoutSupervisor::new(limits.termination_grace),
            limits,
            ambient_mode: AmbientMode::default(),
            base_env: BTreeMap::new(),
        }
    }

    pub fn with_ambient_mode(mut self, mode: AmbientMode) -> Self {
        self.ambient_mode = mode;
        self
    }

    /// Environment every isolated execution starts from
    pub fn with_base_env(mut self, base_env: BTreeMap<String, String>) -> Self {
        self.base_env = base_env;
        self
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &'static str {
        self.worker.interpreter_name()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn ambient_mode(&self) -> AmbientMode {
        self.ambient_mode
    }

    /// Check a request and turn it into worker input plus its effective
    /// timeout. Nothing is executed.
    pub fn validate(&self, request: &ExecutionRequest) -> Result<(Snippet, f64)> {
        if request.code.is_empty() {
            return Err(SandboxError::invalid("Code is required"));
        }
        if request.code.len() > self.limits.max_code_bytes {
            return Err(SandboxError::invalid(format!(
                "Code exceeds the maximum size of {} bytes",
                self.limits.max_code_bytes
            )));
        }
        let timeout_secs = self.limits.effective_timeout(request.timeout)?;

        let env = request.env_strings();
        for (key, value) in &env {
            validate_env_entry(key, value)?;
        }

        Ok((
            Snippet {
                code: request.code.clone(),
                args: request.args.clone(),
                env,
            },
            timeout_secs,
        ))
    }

    fn store(&self) -> Arc<dyn AmbientStore> {
        match self.ambient_mode {
            AmbientMode::Isolated => Arc::new(IsolatedStore::new(self.base_env.clone())),
            AmbientMode::Process => ProcessStore::global(),
        }
    }

    /// Execute one request end to end
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let accepted = Instant::now();
        let id = ExecutionId::new();
        let (snippet, timeout_secs) = self.validate(&request).inspect_err(|err| {
            tracing::info!(execution_id = %id, error = %err, "Rejected execution request");
        })?;

        tracing::info!(
            execution_id = %id,
            runtime = self.runtime_name(),
            ambient = %self.ambient_mode,
            code_len = snippet.code.len(),
            timeout_secs,
            "Executing code"
        );

        let gate = match self.ambient_mode {
            AmbientMode::Process => Some(process_gate().lock_owned().await),
            AmbientMode::Isolated => None,
        };

        let phases = PhaseTracker::new(id);
        let worker = self.worker.clone();
        let store = self.store();
        let worker_phases = phases.clone();
        let outcome = self
            .supervisor
            .run_bounded(timeout_secs, move |abort| {
                let _gate = gate;
                worker.run(&snippet, store.as_ref(), &abort, &worker_phases)
            })
            .await;

        let partial = match outcome {
            Ok(partial) => partial,
            Err(err) => {
                tracing::error!(
                    execution_id = %id,
                    phase = ?phases.phase(),
                    error = %err,
                    "Execution failed inside the sandbox core"
                );
                return Err(err);
            }
        };

        let result = assemble(partial, accepted);
        phases.advance(ExecutionPhase::ResultAssembled)?;

        if result.timed_out() {
            tracing::warn!(
                execution_id = %id,
                timeout_secs,
                elapsed_ms = result.execution_time_ms,
                "Execution timed out"
            );
        } else {
            tracing::info!(
                execution_id = %id,
                exit_code = result.exit_code,
                elapsed_ms = result.execution_time_ms,
                "Execution finished"
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl<I: Interpreter> CodeRunner for SandboxService<I> {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.execute(request).await
    }

    fn name(&self) -> &str {
        self.runtime_name()
    }
}
