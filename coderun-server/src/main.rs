use anyhow::{Context, Result};
use clap::Parser;
use coderun_sandbox::{AmbientMode, SandboxService, V8Interpreter};
use coderun_server::{start_server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "coderun-server")]
#[command(about = "Run untrusted JavaScript snippets with a deadline")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Upper bound on any request's timeout, in seconds
    #[arg(long)]
    pub max_execution_time: Option<f64>,

    /// Where request env/args are applied (isolated, process)
    #[arg(long, value_parser = ["isolated", "process"])]
    pub ambient_mode: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags take precedence over everything else.
    fn apply_to(&self, config: &mut ServerConfig) -> Result<()> {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.max_execution_time {
            config.limits.max_execution_time_secs = secs;
        }
        if let Some(mode) = &self.ambient_mode {
            config.ambient_mode = mode
                .parse::<AmbientMode>()
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }

    fn resolve(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())?;
        self.apply_to(&mut config)?;
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.resolve()?;
    info!(
        max_execution_time_secs = config.limits.max_execution_time_secs,
        ambient = %config.ambient_mode,
        "Configuration loaded"
    );

    let service = SandboxService::with_limits(
        V8Interpreter::with_limits(&config.limits),
        config.limits.clone(),
    )
    .with_ambient_mode(config.ambient_mode)
    .with_base_env(config.base_env.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

    start_server(listener, Arc::new(service), shutdown_signal()).await
}
