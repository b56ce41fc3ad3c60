//! Execution worker: one snippet, one fresh context, one instance

use crate::ambient::{AmbientStore, StateVirtualizer};
use crate::context::{CapturedOutput, ContextBuilder, ExecutionContext};
use crate::error::{Result, ScriptError};
use crate::execution::{ExecutionPhase, PhaseTracker};
use crate::runtime::{AbortSignal, Instance, Interpreter};
use crate::types::PartialResult;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validated input of one worker invocation
#[derive(Debug, Clone, Default)]
pub struct Snippet {
    pub code: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// How the snippet ended
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(ScriptError),
    Aborted(ScriptError),
}

/// Runs snippets through an interpreter backend
pub struct ExecutionWorker<I: Interpreter> {
    interpreter: Arc<I>,
    contexts: ContextBuilder,
}

impl<I: Interpreter> Clone for ExecutionWorker<I> {
    fn clone(&self) -> Self {
        Self {
            interpreter: Arc::clone(&self.interpreter),
            contexts: self.contexts.clone(),
        }
    }
}

impl<I: Interpreter> ExecutionWorker<I> {
    pub fn new(interpreter: I, contexts: ContextBuilder) -> Self {
        Self {
            interpreter: Arc::new(interpreter),
            contexts,
        }
    }

    pub fn interpreter_name(&self) -> &'static str {
        self.interpreter.name()
    }

    /// Execute `snippet` once with its ambient state applied to `store`.
    ///
    /// Snippet failures become a result with `exit_code == 1`. The returned
    /// error is reserved for failures of the core itself. The store is
    /// restored before this returns, whatever the outcome.
    pub fn run(
        &self,
        snippet: &Snippet,
        store: &dyn AmbientStore,
        abort: &AbortSignal,
        phases: &PhaseTracker,
    ) -> Result<PartialResult> {
        let mut context = self.contexts.build();

        let applied = StateVirtualizer::new(store).apply(&snippet.env, &snippet.args)?;
        phases.advance(ExecutionPhase::StateApplied)?;
        context.bind_ambient(applied.live().clone());

        phases.advance(ExecutionPhase::Executing)?;
        let outcome = self.execute(&context, &snippet.code, abort)?;
        phases.advance(match outcome {
            Outcome::Completed => ExecutionPhase::Completed,
            Outcome::Failed(_) => ExecutionPhase::Failed,
            Outcome::Aborted(_) => ExecutionPhase::TimedOut,
        })?;

        applied.restore()?;
        phases.advance(ExecutionPhase::StateRestored)?;

        Ok(partial_result(context.sink().collect(), context.sink().max_bytes(), outcome))
    }

    fn execute(
        &self,
        context: &ExecutionContext,
        code: &str,
        abort: &AbortSignal,
    ) -> Result<Outcome> {
        if abort.is_aborted() {
            return Ok(Outcome::Aborted(aborted_before_start()));
        }

        let mut instance = self.interpreter.instantiate(context, abort)?;
        let result = instance.compile(code).and_then(|unit| {
            if abort.is_aborted() {
                return Err(aborted_before_start());
            }
            instance.execute(unit)
        });

        Ok(match result {
            Ok(()) => Outcome::Completed,
            Err(err) if abort.is_aborted() => Outcome::Aborted(err),
            Err(err) => Outcome::Failed(err),
        })
    }
}

fn aborted_before_start() -> ScriptError {
    ScriptError::runtime("execution terminated", "")
}

/// Fold captured output and the outcome into the worker's contract.
fn partial_result(output: CapturedOutput, max_output_bytes: usize, outcome: Outcome) -> PartialResult {
    let mut stderr = output.stderr;
    if output.truncated {
        stderr.push_str(&format!("[output truncated after {} bytes]\n", max_output_bytes));
    }

    let (exit_code, error) = match outcome {
        Outcome::Completed => (0, String::new()),
        Outcome::Failed(err) | Outcome::Aborted(err) => {
            stderr.push_str(&err.render());
            (1, err.message)
        }
    };

    PartialResult {
        stdout: trim_trailing_newline(output.stdout),
        stderr,
        exit_code,
        error,
    }
}

/// Remove exactly one trailing `\n`, if present.
fn trim_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
    }
    text
}
