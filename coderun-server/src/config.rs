//! Server configuration
//!
//! Resolved once at startup from, in increasing precedence: built-in
//! defaults, an optional TOML file, environment variables (a `.env` file is
//! honoured) and command-line flags.

use anyhow::{anyhow, Context, Result};
use coderun_sandbox::{AmbientMode, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Process-wide maximum execution time, in seconds
pub const ENV_MAX_EXECUTION_TIME: &str = "MAX_EXECUTION_TIME";
pub const ENV_HOST: &str = "CODERUN_HOST";
pub const ENV_PORT: &str = "CODERUN_PORT";
pub const ENV_AMBIENT_MODE: &str = "CODERUN_AMBIENT_MODE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ambient_mode: AmbientMode,
    /// Environment every isolated execution starts from
    pub base_env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8084,
            ambient_mode: AmbientMode::default(),
            base_env: BTreeMap::new(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay values found through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_MAX_EXECUTION_TIME) {
            self.limits.max_execution_time_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_MAX_EXECUTION_TIME, value))?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(value) = lookup(ENV_PORT) {
            self.port = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_PORT, value))?;
        }
        if let Some(value) = lookup(ENV_AMBIENT_MODE) {
            self.ambient_mode = value
                .parse::<AmbientMode>()
                .map_err(|e| anyhow!("{}: {}", ENV_AMBIENT_MODE, e))?;
        }
        Ok(())
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host must not be empty"));
        }
        self.limits
            .validate()
            .map_err(|e| anyhow!("Invalid limits: {}", e))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
