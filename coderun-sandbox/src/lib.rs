//! Coderun sandbox - bounded execution of untrusted script snippets
//!
//! One request flows through five parts: a fresh restricted context
//! ([`ContextBuilder`]), ambient state applied and later restored
//! ([`StateVirtualizer`]), the snippet itself ([`ExecutionWorker`]), a deadline
//! around it ([`TimeoutSupervisor`]) and timing attached to the outcome
//! ([`assemble`]). [`SandboxService`] wires them together.

mod ambient;
mod context;
mod error;
mod execution;
mod limits;
mod runtime;
mod service;
mod supervisor;
mod types;
mod worker;

pub use ambient::{
    AmbientState, AmbientStateSnapshot, AmbientStore, AppliedState, IsolatedStore, ProcessStore,
    StateVirtualizer, SCRIPT_NAME,
};
pub use context::{
    capability, Capability, CapturedOutput, ContextBuilder, ExecutionContext, OutputSink,
    OutputStream, PrintOptions, CAPABILITIES,
};
pub use error::{Result, SandboxError, ScriptError, ScriptErrorKind};
pub use execution::{assemble, ExecutionId, ExecutionPhase, PhaseTracker};
pub use limits::ResourceLimits;
#[cfg(feature = "v8")]
pub use runtime::V8Interpreter;
pub use runtime::{AbortSignal, Instance, Interpreter};
pub use service::{AmbientMode, CodeRunner, SandboxService};
pub use supervisor::TimeoutSupervisor;
pub use types::{EnvValue, ExecutionRequest, ExecutionResult, PartialResult, TIMEOUT_ERROR};
pub use worker::{ExecutionWorker, Snippet};
