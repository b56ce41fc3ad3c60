//! Resource limits configuration for sandboxed execution

use crate::error::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits for code execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Process-wide ceiling on the execution time of one request, in seconds
    pub max_execution_time_secs: f64,

    /// Timeout applied when the request does not ask for one
    pub default_timeout_secs: f64,

    /// How long a timed-out worker may take to unwind after being aborted
    #[serde(with = "humantime_serde")]
    pub termination_grace: Duration,

    /// Largest accepted snippet, in bytes
    pub max_code_bytes: usize,

    /// Captured output cap across stdout and stderr
    pub max_output_bytes: usize,

    /// Maximum heap for runtimes that support it
    pub max_heap_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_time_secs: 5.0,
            default_timeout_secs: 5.0,
            termination_grace: Duration::from_millis(500),
            max_code_bytes: 100 * 1024,             // 100 KB
            max_output_bytes: 1024 * 1024,          // 1 MB
            max_heap_bytes: Some(64 * 1024 * 1024), // 64 MB
        }
    }
}

impl ResourceLimits {
    /// Create strict limits for hostile workloads
    pub fn strict() -> Self {
        Self {
            max_execution_time_secs: 2.0,
            default_timeout_secs: 2.0,
            termination_grace: Duration::from_millis(250),
            max_code_bytes: 16 * 1024,
            max_output_bytes: 64 * 1024,
            max_heap_bytes: Some(32 * 1024 * 1024),
        }
    }

    /// Override the process-wide maximum execution time
    pub fn with_max_execution_time(mut self, secs: f64) -> Self {
        self.max_execution_time_secs = secs;
        self
    }

    /// Effective timeout for a request: the smaller of the requested (or
    /// default) timeout and the configured maximum.
    pub fn effective_timeout(&self, requested: Option<f64>) -> Result<f64> {
        let requested = requested.unwrap_or(self.default_timeout_secs);
        if !requested.is_finite() || requested <= 0.0 {
            return Err(SandboxError::invalid(format!(
                "Timeout must be a positive number of seconds, got {}",
                requested
            )));
        }
        Ok(requested.min(self.max_execution_time_secs))
    }

    /// Check internal consistency at startup
    pub fn validate(&self) -> Result<()> {
        if !self.max_execution_time_secs.is_finite() || self.max_execution_time_secs <= 0.0 {
            return Err(SandboxError::invalid(
                "max_execution_time_secs must be a positive number",
            ));
        }
        if !self.default_timeout_secs.is_finite() || self.default_timeout_secs <= 0.0 {
            return Err(SandboxError::invalid(
                "default_timeout_secs must be a positive number",
            ));
        }
        if self.max_code_bytes == 0 {
            return Err(SandboxError::invalid("max_code_bytes must be non-zero"));
        }
        Ok(())
    }
}
