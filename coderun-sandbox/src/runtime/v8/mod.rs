//! V8 JavaScript runtime using deno_core

mod ops;

use super::{AbortSignal, Instance, Interpreter};
use crate::ambient::SCRIPT_NAME;
use crate::context::ExecutionContext;
use crate::error::{Result, ScriptError, ScriptErrorKind, SandboxError};
use crate::limits::ResourceLimits;
use deno_core::error::CoreError;
use deno_core::v8;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// V8 JavaScript runtime
#[derive(Debug, Clone)]
pub struct V8Interpreter {
    /// Heap cap for each isolate
    max_heap_bytes: Option<usize>,
}

impl V8Interpreter {
    /// Create a new V8 runtime with default limits
    pub fn new() -> Self {
        Self::with_limits(&ResourceLimits::default())
    }

    /// Create V8 runtime with custom resource limits
    pub fn with_limits(limits: &ResourceLimits) -> Self {
        Self {
            max_heap_bytes: limits.max_heap_bytes,
        }
    }
}

impl Default for V8Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for V8Interpreter {
    type Instance = V8Instance;

    fn name(&self) -> &'static str {
        "v8"
    }

    fn instantiate(&self, context: &ExecutionContext, abort: &AbortSignal) -> Result<V8Instance> {
        let event_loop = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| SandboxError::internal(format!("failed to start event loop: {}", err)))?;

        let mut runtime_options = RuntimeOptions {
            extensions: vec![ops::sandbox_extension()],
            ..Default::default()
        };

        // Set heap limits if specified
        if let Some(max_bytes) = self.max_heap_bytes {
            // Initial heap is 10MB or 10% of max, whichever is smaller
            let initial_bytes = (max_bytes / 10).min(10 * 1024 * 1024);
            runtime_options.create_params =
                Some(v8::CreateParams::default().heap_limits(initial_bytes, max_bytes));
        }

        let mut runtime = {
            let _enter = event_loop.enter();
            JsRuntime::new(runtime_options)
        };
        runtime.op_state().borrow_mut().put(context.sink().clone());

        let isolate = runtime.v8_isolate().thread_safe_handle();
        let heap_exhausted = Arc::new(AtomicBool::new(false));
        {
            let isolate = isolate.clone();
            let heap_exhausted = Arc::clone(&heap_exhausted);
            // Terminate instead of letting V8 abort the host process; the
            // extra headroom lets the isolate unwind.
            runtime.add_near_heap_limit_callback(move |current, _initial| {
                heap_exhausted.store(true, Ordering::SeqCst);
                isolate.terminate_execution();
                current * 2
            });
        }

        let prelude = ops::prelude_script(context)?;
        {
            let _enter = event_loop.enter();
            runtime
                .execute_script("<sandbox-prelude>", prelude)
                .map_err(|err| SandboxError::internal(format!("failed to prepare context: {}", err)))?;
        }

        // Terminating only stops running JS; an idle event loop waiting on a
        // timer also needs a nudge.
        let wake = Arc::new(Notify::new());
        {
            let wake = Arc::clone(&wake);
            abort.on_abort(move || {
                isolate.terminate_execution();
                wake.notify_one();
            });
        }

        Ok(V8Instance {
            runtime,
            event_loop,
            heap_exhausted,
            wake,
            abort: abort.clone(),
        })
    }
}

/// A single isolate, discarded after one snippet
pub struct V8Instance {
    // Dropped before the event loop it was created in
    runtime: JsRuntime,
    event_loop: tokio::runtime::Runtime,
    heap_exhausted: Arc<AtomicBool>,
    wake: Arc<Notify>,
    abort: AbortSignal,
}

impl V8Instance {
    /// Run pending promise jobs and timers until nothing is left, an
    /// unhandled error surfaces, or the instance is aborted.
    fn drain(&mut self) -> std::result::Result<(), ScriptError> {
        let Self {
            runtime,
            event_loop,
            heap_exhausted,
            wake,
            abort,
        } = self;

        let finished = event_loop.block_on(async {
            tokio::select! {
                result = runtime.run_event_loop(PollEventLoopOptions::default()) => Some(result),
                _ = wake.notified() => None,
            }
        });

        if heap_exhausted.load(Ordering::SeqCst) {
            return Err(ScriptError::runtime("memory limit exceeded", ""));
        }
        match finished {
            _ if abort.is_aborted() => Err(ScriptError::runtime("execution terminated", "")),
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(uncaught(err)),
            None => Err(ScriptError::runtime("execution terminated", "")),
        }
    }
}

impl Instance for V8Instance {
    type Unit = v8::Global<v8::Script>;

    fn compile(&mut self, source: &str) -> std::result::Result<Self::Unit, ScriptError> {
        let scope = &mut self.runtime.handle_scope();
        let scope = &mut v8::TryCatch::new(scope);

        let code = v8::String::new(scope, source)
            .ok_or_else(|| ScriptError::compile("source is too large", ""))?;

        match v8::Script::compile(scope, code, None) {
            Some(script) => Ok(v8::Global::new(scope, script)),
            None => Err(caught(scope, ScriptErrorKind::Compile, &self.heap_exhausted)),
        }
    }

    fn execute(&mut self, unit: Self::Unit) -> std::result::Result<(), ScriptError> {
        {
            let _enter = self.event_loop.enter();
            let scope = &mut self.runtime.handle_scope();
            let scope = &mut v8::TryCatch::new(scope);

            let script = v8::Local::new(scope, &unit);
            if script.run(scope).is_none() {
                return Err(caught(scope, ScriptErrorKind::Runtime, &self.heap_exhausted));
            }
        }

        // Promise callbacks and timers run before the result is collected
        self.drain()
    }
}

/// Map an error that escaped to the event loop: a rejection nobody handled
/// or a throw from a timer callback.
fn uncaught(err: CoreError) -> ScriptError {
    match err {
        CoreError::Js(js) => {
            let message = match js.message {
                Some(message) if !message.is_empty() => message,
                _ => strip_uncaught(&js.exception_message).to_string(),
            };
            let trace = js.stack.unwrap_or(js.exception_message);
            ScriptError::runtime(message, trace)
        }
        other => ScriptError::runtime(other.to_string(), ""),
    }
}

fn strip_uncaught(text: &str) -> &str {
    text.strip_prefix("Uncaught (in promise) ")
        .or_else(|| text.strip_prefix("Uncaught "))
        .unwrap_or(text)
}

/// Turn the exception held by `scope` into a [`ScriptError`].
fn caught(
    scope: &mut v8::TryCatch<v8::HandleScope>,
    kind: ScriptErrorKind,
    heap_exhausted: &AtomicBool,
) -> ScriptError {
    if heap_exhausted.load(Ordering::SeqCst) {
        return ScriptError::runtime("memory limit exceeded", "");
    }
    if scope.has_terminated() {
        return ScriptError::runtime("execution terminated", "");
    }

    let Some(exception) = scope.exception() else {
        return ScriptError {
            kind,
            message: "unknown error".to_string(),
            trace: String::new(),
        };
    };

    let message = match property_string(scope, exception, "message") {
        Some(message) if !message.is_empty() => message,
        _ => exception.to_rust_string_lossy(scope),
    };
    let stack = property_string(scope, exception, "stack");

    // Syntax errors and thrown non-Error values carry no frames
    let mut trace = stack.clone().unwrap_or_else(|| exception.to_rust_string_lossy(scope));
    if kind == ScriptErrorKind::Compile || stack.is_none() {
        if let Some(location) = source_location(scope) {
            trace.push('\n');
            trace.push_str(&location);
        }
    }

    ScriptError {
        kind,
        message,
        trace,
    }
}

fn property_string(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
    name: &str,
) -> Option<String> {
    if !value.is_object() {
        return None;
    }
    let object = value.to_object(scope)?;
    let key = v8::String::new(scope, name)?;
    let property = object.get(scope, key.into())?;
    if property.is_null_or_undefined() {
        return None;
    }
    Some(property.to_rust_string_lossy(scope))
}

fn source_location(scope: &mut v8::TryCatch<v8::HandleScope>) -> Option<String> {
    let message = scope.message()?;
    let line = message.get_line_number(scope).unwrap_or(0);
    let column = message.get_start_column() + 1;
    let mut location = format!("    at {}:{}:{}", SCRIPT_NAME, line, column);
    if let Some(source_line) = message.get_source_line(scope) {
        location.push('\n');
        location.push_str(&source_line.to_rust_string_lossy(scope));
    }
    Some(location)
}
