//! Core types for sandbox execution

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Request to execute a snippet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    #[serde(default)]
    pub code: String,

    /// Requested timeout in seconds (clamped to the configured maximum)
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Positional arguments, visible after the synthetic program name
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables overlaid on the ambient environment
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
}

impl ExecutionRequest {
    /// Create a simple execution request
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Append a positional argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Environment with every value coerced to its string form.
    pub fn env_strings(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect()
    }
}

/// Scalar environment value as accepted on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
    Null,
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Text(text) => f.write_str(text),
            EnvValue::Number(number) => write!(f, "{}", number),
            EnvValue::Flag(flag) => write!(f, "{}", flag),
            EnvValue::Null => Ok(()),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Text(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        EnvValue::Text(value)
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        EnvValue::Flag(value)
    }
}

impl From<i64> for EnvValue {
    fn from(value: i64) -> Self {
        EnvValue::Number(value.into())
    }
}

/// `error` of a result whose deadline elapsed
pub const TIMEOUT_ERROR: &str = "execution timed out";

/// Worker or supervisor outcome before timing is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error: String,
}

impl PartialResult {
    /// Synthetic result reported when the deadline elapses first.
    pub fn timed_out(timeout_secs: f64) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!(
                "Error: Execution timed out after {} seconds\n",
                format_seconds(timeout_secs)
            ),
            exit_code: 1,
            error: TIMEOUT_ERROR.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of code execution, as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (0 = success, 1 = any failure)
    pub exit_code: i32,
    /// Error message, empty on success
    pub error: String,
    /// Wall-clock time from acceptance to assembly
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Response body for a request rejected before execution.
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stdout: String::new(),
            stderr: message.clone(),
            exit_code: 1,
            error: message,
            execution_time_ms: 0,
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_empty()
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code != 0 && self.error == TIMEOUT_ERROR
    }
}

/// Seconds rendered without a trailing `.0` for whole values.
pub fn format_seconds(secs: f64) -> String {
    if secs.fract() == 0.0 && secs.abs() < 1e15 {
        format!("{}", secs as i64)
    } else {
        format!("{}", secs)
    }
}
