//! Agent configuration.
//!
//! Values come from four layers, highest priority first: command-line flags, an
//! optional TOML file, `REMCON_*` environment variables, built-in defaults.
//!
//! ```toml
//! server_url = "https://console.example.com"
//! device_binary = "/opt/platform-tools/adb"
//! device_args = ["-s", "emulator-5554", "shell"]
//! require_device = false
//! local_timeout_secs = 30
//! teardown_grace_ms = 2000
//! flush_partial = true
//! connect_timeout_secs = 10
//! ```

use crate::device::DEFAULT_TEARDOWN_GRACE;
use crate::error::{AgentError, Result};
use crate::local_exec::DEFAULT_LOCAL_TIMEOUT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:5001";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_LOCAL_TIMEOUT_SECS: &str = "REMCON_LOCAL_TIMEOUT_SECS";
pub const ENV_TEARDOWN_GRACE_MS: &str = "REMCON_TEARDOWN_GRACE_MS";

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub server_url: Option<String>,
    pub device_binary: Option<PathBuf>,
    pub device_args: Option<Vec<String>>,
    pub require_device: Option<bool>,
    pub local_timeout_secs: Option<u64>,
    pub teardown_grace_ms: Option<u64>,
    pub flush_partial: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
}

impl ConfigLayer {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::Config(format!("invalid TOML: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))
    }

    /// Read the `REMCON_*` variables through `lookup`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            local_timeout_secs: parse_env(&lookup, ENV_LOCAL_TIMEOUT_SECS)?,
            teardown_grace_ms: parse_env(&lookup, ENV_TEARDOWN_GRACE_MS)?,
            ..Self::default()
        })
    }

    /// Fill every unset field from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            server_url: self.server_url.or(lower.server_url),
            device_binary: self.device_binary.or(lower.device_binary),
            device_args: self.device_args.or(lower.device_args),
            require_device: self.require_device.or(lower.require_device),
            local_timeout_secs: self.local_timeout_secs.or(lower.local_timeout_secs),
            teardown_grace_ms: self.teardown_grace_ms.or(lower.teardown_grace_ms),
            flush_partial: self.flush_partial.or(lower.flush_partial),
            connect_timeout_secs: self.connect_timeout_secs.or(lower.connect_timeout_secs),
        }
    }
}

fn parse_env(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| AgentError::Config(format!("{name}={value}: {e}"))),
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub server_url: String,
    pub device_binary: Option<PathBuf>,
    pub device_args: Vec<String>,
    pub require_device: bool,
    pub local_timeout: Duration,
    pub teardown_grace: Duration,
    pub flush_partial: bool,
    pub connect_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            device_binary: None,
            device_args: vec!["shell".to_string()],
            require_device: false,
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
            flush_partial: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl AgentConfig {
    /// Merge `cli` over `file` over `env` over defaults.
    pub fn resolve(cli: ConfigLayer, file: Option<ConfigLayer>, env: ConfigLayer) -> Result<Self> {
        let merged = cli.or(file.unwrap_or_default()).or(env);
        let defaults = Self::default();

        let local_timeout = merged
            .local_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.local_timeout);
        if local_timeout.is_zero() {
            return Err(AgentError::Config(
                "local timeout must be at least one second".to_string(),
            ));
        }

        let connect_timeout = merged
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);
        if connect_timeout.is_zero() {
            return Err(AgentError::Config(
                "connect timeout must be at least one second".to_string(),
            ));
        }

        Ok(Self {
            server_url: merged.server_url.unwrap_or(defaults.server_url),
            device_binary: merged.device_binary,
            device_args: merged.device_args.unwrap_or(defaults.device_args),
            require_device: merged.require_device.unwrap_or(defaults.require_device),
            local_timeout,
            teardown_grace: merged
                .teardown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.teardown_grace),
            flush_partial: merged.flush_partial.unwrap_or(defaults.flush_partial),
            connect_timeout,
        })
    }
}
