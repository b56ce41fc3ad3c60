//! Error types for sandboxed execution
//!
//! Two families exist. [`SandboxError`] is what the core hands back to its
//! caller: either the request was rejected before anything ran, or the core
//! itself broke. [`ScriptError`] describes a failure caused by the snippet and
//! never leaves the execution worker; it is always folded into a structured
//! result.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The request was rejected before any execution was attempted.
    #[error("{0}")]
    InvalidInput(String),

    /// A defect in the core (context construction, state restoration, worker
    /// supervision). Not the snippet's fault.
    #[error("Internal sandbox failure: {0}")]
    Internal(String),
}

impl SandboxError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// Phase in which a snippet failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// The source did not parse under the language grammar.
    Compile,
    /// The snippet threw while running.
    Runtime,
}

/// A failure raised by the snippet itself
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    /// Human-readable exception message
    pub message: String,
    /// Full diagnostic trace (stack or source location)
    pub trace: String,
}

impl ScriptError {
    pub fn compile(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::Compile,
            message: message.into(),
            trace: trace.into(),
        }
    }

    pub fn runtime(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::Runtime,
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Text written to the captured stderr for this failure.
    pub fn render(&self) -> String {
        let mut rendered = format!("Error: {}\n", self.message);
        if !self.trace.is_empty() {
            rendered.push_str(&self.trace);
            if !self.trace.ends_with('\n') {
                rendered.push('\n');
            }
        }
        rendered
    }
}
