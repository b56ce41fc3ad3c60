//! Restricted execution context and output capture
//!
//! The namespace a snippet sees is described by a fixed capability table
//! rather than by whatever the engine happens to install. Backends keep the
//! [`Capability::Builtin`] entries, install the host-provided entries, and
//! remove everything else before the snippet runs.

use crate::ambient::AmbientState;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};

/// How a name in the restricted namespace is provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Language built-in kept as the engine defines it
    Builtin,
    /// `print(...values[, {sep, end, file}])`, writes to the output sink
    Print,
    /// `console.*`, writes to the output sink
    Console,
    /// `process.argv` / `process.env`, backed by the applied ambient state
    Process,
    /// `setTimeout` and friends. Callbacks only fire while the execution's
    /// deadline is still open; abort drops whatever is still scheduled.
    Timers,
}

/// Every name visible to a snippet. Anything absent here is removed.
pub const CAPABILITIES: &[(&str, Capability)] = &[
    // Value properties
    ("globalThis", Capability::Builtin),
    ("Infinity", Capability::Builtin),
    ("NaN", Capability::Builtin),
    ("undefined", Capability::Builtin),
    // Functions
    ("isFinite", Capability::Builtin),
    ("isNaN", Capability::Builtin),
    ("parseFloat", Capability::Builtin),
    ("parseInt", Capability::Builtin),
    ("decodeURI", Capability::Builtin),
    ("decodeURIComponent", Capability::Builtin),
    ("encodeURI", Capability::Builtin),
    ("encodeURIComponent", Capability::Builtin),
    ("escape", Capability::Builtin),
    ("unescape", Capability::Builtin),
    // Fundamental objects
    ("Object", Capability::Builtin),
    ("Function", Capability::Builtin),
    ("Boolean", Capability::Builtin),
    ("Symbol", Capability::Builtin),
    // Errors
    ("Error", Capability::Builtin),
    ("AggregateError", Capability::Builtin),
    ("EvalError", Capability::Builtin),
    ("RangeError", Capability::Builtin),
    ("ReferenceError", Capability::Builtin),
    ("SyntaxError", Capability::Builtin),
    ("TypeError", Capability::Builtin),
    ("URIError", Capability::Builtin),
    // Numbers, dates, text
    ("Number", Capability::Builtin),
    ("BigInt", Capability::Builtin),
    ("Math", Capability::Builtin),
    ("Date", Capability::Builtin),
    ("String", Capability::Builtin),
    ("RegExp", Capability::Builtin),
    ("Intl", Capability::Builtin),
    // Collections
    ("Array", Capability::Builtin),
    ("Map", Capability::Builtin),
    ("Set", Capability::Builtin),
    ("WeakMap", Capability::Builtin),
    ("WeakSet", Capability::Builtin),
    // Binary data
    ("ArrayBuffer", Capability::Builtin),
    ("DataView", Capability::Builtin),
    ("Int8Array", Capability::Builtin),
    ("Uint8Array", Capability::Builtin),
    ("Uint8ClampedArray", Capability::Builtin),
    ("Int16Array", Capability::Builtin),
    ("Uint16Array", Capability::Builtin),
    ("Int32Array", Capability::Builtin),
    ("Uint32Array", Capability::Builtin),
    ("Float32Array", Capability::Builtin),
    ("Float64Array", Capability::Builtin),
    ("BigInt64Array", Capability::Builtin),
    ("BigUint64Array", Capability::Builtin),
    // Structured data, control abstraction, reflection
    ("JSON", Capability::Builtin),
    ("Promise", Capability::Builtin),
    ("Reflect", Capability::Builtin),
    ("Proxy", Capability::Builtin),
    // Host-provided
    ("print", Capability::Print),
    ("console", Capability::Console),
    ("process", Capability::Process),
    ("setTimeout", Capability::Timers),
    ("clearTimeout", Capability::Timers),
    ("setInterval", Capability::Timers),
    ("clearInterval", Capability::Timers),
];

/// Look up how `name` is provided, if it is visible at all.
pub fn capability(name: &str) -> Option<Capability> {
    CAPABILITIES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, capability)| *capability)
}

/// Destination of a printed fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Resolve the `file` keyword of `print`. Absent means stdout; anything
    /// other than `"stdout"` is treated as stderr.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector {
            None | Some("stdout") => OutputStream::Stdout,
            Some(_) => OutputStream::Stderr,
        }
    }
}

/// Keyword parameters of the print replacement
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    pub sep: Option<String>,
    pub end: Option<String>,
    pub file: Option<String>,
}

impl PrintOptions {
    pub fn separator(&self) -> &str {
        self.sep.as_deref().unwrap_or(" ")
    }

    pub fn terminator(&self) -> &str {
        self.end.as_deref().unwrap_or("\n")
    }

    pub fn stream(&self) -> OutputStream {
        OutputStream::from_selector(self.file.as_deref())
    }
}

/// Joined contents of an [`OutputSink`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when fragments were dropped because of the byte cap
    pub truncated: bool,
}

#[derive(Debug, Default)]
struct SinkBuffers {
    stdout: Vec<String>,
    stderr: Vec<String>,
    bytes: usize,
    truncated: bool,
}

/// Append-only capture of everything a snippet prints.
///
/// Clones share the same buffers, so a backend can hold one handle while the
/// worker collects from another.
#[derive(Debug, Clone)]
pub struct OutputSink {
    buffers: Arc<Mutex<SinkBuffers>>,
    max_bytes: usize,
}

impl OutputSink {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(SinkBuffers::default())),
            max_bytes,
        }
    }

    /// Format `values` with the keyword options and append the result.
    pub fn print(&self, values: &[String], options: &PrintOptions) {
        let mut fragment = values.join(options.separator());
        fragment.push_str(options.terminator());
        self.write(options.stream(), fragment);
    }

    pub fn write(&self, stream: OutputStream, fragment: String) {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.truncated {
            return;
        }
        if buffers.bytes + fragment.len() > self.max_bytes {
            buffers.truncated = true;
            return;
        }
        buffers.bytes += fragment.len();
        match stream {
            OutputStream::Stdout => buffers.stdout.push(fragment),
            OutputStream::Stderr => buffers.stderr.push(fragment),
        }
    }

    pub fn collect(&self) -> CapturedOutput {
        let buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        CapturedOutput {
            stdout: buffers.stdout.concat(),
            stderr: buffers.stderr.concat(),
            truncated: buffers.truncated,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

/// Namespace description handed to an interpreter backend.
///
/// Owned by exactly one worker invocation and dropped afterwards.
#[derive(Debug)]
pub struct ExecutionContext {
    capabilities: &'static [(&'static str, Capability)],
    sink: OutputSink,
    ambient: AmbientState,
}

impl ExecutionContext {
    pub fn capabilities(&self) -> &'static [(&'static str, Capability)] {
        self.capabilities
    }

    /// Names of the language built-ins that survive restriction.
    pub fn builtin_names(&self) -> Vec<&'static str> {
        self.capabilities
            .iter()
            .filter(|(_, capability)| *capability == Capability::Builtin)
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Ambient state the snippet observes through `process`.
    pub fn ambient(&self) -> &AmbientState {
        &self.ambient
    }

    pub fn bind_ambient(&mut self, ambient: AmbientState) {
        self.ambient = ambient;
    }
}

/// Produces fresh restricted contexts
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_output_bytes: usize,
}

impl ContextBuilder {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    pub fn build(&self) -> ExecutionContext {
        ExecutionContext {
            capabilities: CAPABILITIES,
            sink: OutputSink::new(self.max_output_bytes),
            ambient: AmbientState::default(),
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(crate::limits::ResourceLimits::default().max_output_bytes)
    }
}
