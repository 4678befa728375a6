//! Error types for the agent
//!
//! Local command failures (`Timeout`, `DirectoryNotFound`, `SpawnFailure`) become reply
//! text through [`crate::local_exec::failure_text`]; nothing here reaches the
//! control plane as a raw error.

use remcon_common::SessionStateError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("No such file or directory: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device shell not available: {0}")]
    DeviceUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session state error: {0}")]
    State(#[from] SessionStateError),
}

impl AgentError {
    /// Short category name used in structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::SpawnFailure { .. } => "SPAWN",
            AgentError::Io(_) => "IO",
            AgentError::Timeout(_) => "TIMEOUT",
            AgentError::DirectoryNotFound(_) => "DIRECTORY",
            AgentError::TransportDisconnected(_) | AgentError::Transport(_) => "TRANSPORT",
            AgentError::DeviceUnavailable(_) => "DEVICE",
            AgentError::Json(_) => "SERIALIZATION",
            AgentError::Config(_) => "CONFIG",
            AgentError::State(_) => "STATE",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_uses_seconds() {
        let err = AgentError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Command timed out after 30s");
    }

    #[test]
    fn test_spawn_failure_names_program() {
        let err = AgentError::SpawnFailure {
            program: "adb".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("adb"));
        assert_eq!(err.category(), "SPAWN");
    }

    #[test]
    fn test_io_and_state_errors_convert() {
        let err: AgentError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(err.category(), "IO");

        let err: AgentError = SessionStateError::NotAbsolute(PathBuf::from("rel")).into();
        assert_eq!(err.category(), "STATE");
        assert!(err.to_string().contains("rel"));
    }
}
