//! # Remcon Agent CLI
//!
//! Command-line definition and the main entry point.

use crate::config::{AgentConfig, ConfigLayer};
use crate::{agent, utils::logging::init_logging};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Remote console agent: runs commands locally or in a device shell and streams the
/// output back to a Socket.IO control plane.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "remcon_agent connects to a Socket.IO server and executes the commands it sends.

Local mode (default): each command runs through the host shell in the tracked
working directory and the reply carries the full output.

Device mode ('mode device' or 'mode adb'): commands are written to a persistent
'<device-binary> shell' process and its output is streamed back line by line.

Example: remcon_agent https://console.example.com --device-binary ./platform-tools/adb"
)]
pub struct Cli {
    /// Control-plane URL (http, https, ws or wss). Defaults to http://localhost:5001
    #[arg(value_name = "SERVER_URL")]
    pub server_url: Option<String>,

    /// Path to the device-shell binary; skips discovery
    #[arg(long)]
    pub device_binary: Option<PathBuf>,

    /// Arguments for the device-shell binary (repeatable). Defaults to 'shell'
    #[arg(long = "device-arg", allow_hyphen_values = true)]
    pub device_args: Vec<String>,

    /// Exit at startup if no device-shell binary can be found
    #[arg(long)]
    pub require_device: bool,

    /// Hard timeout for local commands in seconds
    #[arg(long)]
    pub local_timeout_secs: Option<u64>,

    /// Grace period between SIGTERM and kill when stopping the device shell
    #[arg(long)]
    pub teardown_grace_ms: Option<u64>,

    /// Drop an unterminated last line when device output closes
    #[arg(long)]
    pub no_flush_partial: bool,

    /// Timeout for the WebSocket connect and Socket.IO handshake in seconds
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to stderr instead of file
    #[arg(long)]
    pub log_to_stderr: bool,
}

impl Cli {
    /// The configuration layer made of flags that were actually given.
    pub fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            server_url: self.server_url.clone(),
            device_binary: self.device_binary.clone(),
            device_args: (!self.device_args.is_empty()).then(|| self.device_args.clone()),
            require_device: self.require_device.then_some(true),
            local_timeout_secs: self.local_timeout_secs,
            teardown_grace_ms: self.teardown_grace_ms,
            flush_partial: self.no_flush_partial.then_some(false),
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }

    /// Merge flags, the optional config file and the environment.
    pub fn resolve_config(&self) -> Result<AgentConfig> {
        let file = self
            .config
            .as_deref()
            .map(ConfigLayer::load)
            .transpose()
            .context("Failed to load configuration file")?;
        let env = ConfigLayer::from_env(|name| std::env::var(name).ok())
            .context("Invalid REMCON_* environment variable")?;
        AgentConfig::resolve(self.to_layer(), file, env).context("Invalid configuration")
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    let log_to_file = !(cli.log_to_stderr || env_flag_enabled("REMCON_LOG_TO_STDERR"));
    init_logging(log_level, log_to_file)?;

    let config = cli.resolve_config()?;
    tracing::info!(
        server = %config.server_url,
        local_timeout_secs = config.local_timeout.as_secs(),
        "Starting remcon_agent"
    );

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("A rustls crypto provider was already installed");
    }

    agent::run(config).await.context("Agent terminated with an error")
}

fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name)
        .map(|value| flag_value_enabled(&value))
        .unwrap_or(false)
}

fn flag_value_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
