//! # Interactive Device Shell
//!
//! Owns the single long-lived `<device-binary> shell` subprocess. Commands are written
//! to its stdin; everything it prints is forwarded by an [`OutputStreamer`] bound to
//! that process instance.
//!
//! The handle is checked on every device command: a missing or exited process is
//! replaced before the command is written, so the session heals after the device
//! disconnects or the shell exits. Writes are not serialized against output of a
//! previous command; back-to-back commands may interleave their output.

pub mod discovery;

use crate::error::{AgentError, Result};
use crate::streamer::{OutputStreamer, StreamEnd};
use crate::transport::OutputSink;
use remcon_common::SessionState;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a dead shell's streamer may keep draining buffered output.
const DEAD_SHELL_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DeviceShellConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Wait between SIGTERM and a forced kill.
    pub teardown_grace: Duration,
    /// Forward an unterminated last line when the shell's output closes.
    pub flush_partial: bool,
}

impl DeviceShellConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec!["shell".to_string()],
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
            flush_partial: true,
        }
    }
}

struct ShellHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    streamer: OutputStreamer,
}

pub struct DeviceShell {
    config: DeviceShellConfig,
    state: SessionState,
    sink: Arc<dyn OutputSink>,
    handle: Mutex<Option<ShellHandle>>,
    spawn_count: AtomicU64,
    cancel: CancellationToken,
}

impl DeviceShell {
    /// `cancel` is the parent of every streamer's token.
    pub fn new(
        config: DeviceShellConfig,
        state: SessionState,
        sink: Arc<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            sink,
            handle: Mutex::new(None),
            spawn_count: AtomicU64::new(0),
            cancel,
        }
    }

    /// Number of subprocesses started so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Whether a live subprocess is attached right now.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.handle.lock().await;
        match guard.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Make sure a live subprocess exists, spawning one if needed.
    ///
    /// Returns `false` when the spawn fails or the agent is shutting down.
    pub async fn ensure_started(&self) -> bool {
        let mut guard = self.handle.lock().await;

        if let Some(handle) = guard.as_mut() {
            match handle.child.try_wait() {
                Ok(None) => return true,
                Ok(Some(status)) => info!("Device shell exited with {}; restarting", status),
                Err(e) => warn!("Could not poll device shell: {}; restarting", e),
            }
            if let Some(stale) = guard.take() {
                retire(stale).await;
            }
        }

        if !self.state.is_running() || self.cancel.is_cancelled() {
            debug!("Not starting device shell during shutdown");
            return false;
        }

        match self.spawn() {
            Ok(handle) => {
                *guard = Some(handle);
                true
            }
            Err(e) => {
                error!(category = e.category(), "{}", e);
                false
            }
        }
    }

    fn spawn(&self) -> Result<ShellHandle> {
        let program = self.config.program.display().to_string();
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AgentError::SpawnFailure {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| AgentError::SpawnFailure {
            program: program.clone(),
            source: std::io::Error::other("stdout was not captured"),
        })?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let streamer = OutputStreamer::spawn(
            stdout,
            stderr,
            self.sink.clone(),
            self.cancel.child_token(),
            self.config.flush_partial,
        );

        let count = self.spawn_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            pid = child.id(),
            spawn_count = count,
            "Device shell started: {} {}",
            program,
            self.config.args.join(" ")
        );

        Ok(ShellHandle {
            child,
            stdin,
            streamer,
        })
    }

    /// Write `command` plus a newline to the shell and flush.
    pub async fn send(&self, command: &str) -> Result<()> {
        let mut guard = self.handle.lock().await;
        let stdin = guard
            .as_mut()
            .and_then(|handle| handle.stdin.as_mut())
            .ok_or_else(|| {
                AgentError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device shell is not running",
                ))
            })?;

        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        debug!("Sent to device shell: {}", command);
        Ok(())
    }

    /// Stop the subprocess and its streamer. No-op when nothing is running.
    pub async fn teardown(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            shutdown_handle(handle, self.config.teardown_grace).await;
        }
    }
}

/// Clean up after a shell that already exited.
async fn retire(mut handle: ShellHandle) {
    handle.stdin.take();
    let _ = handle.child.wait().await;
    let end = handle.streamer.finish(DEAD_SHELL_DRAIN).await;
    debug!("Previous device shell streamer ended: {:?}", end);
}

/// Close stdin, ask the process to terminate, then kill it after `grace`.
async fn shutdown_handle(mut handle: ShellHandle, grace: Duration) {
    let pid = handle.child.id();
    debug!(?pid, "Shutting down device shell");

    drop(handle.stdin.take());
    request_terminate(&handle.child);

    match tokio::time::timeout(grace, handle.child.wait()).await {
        Ok(Ok(status)) => debug!(?pid, "Device shell exited with {}", status),
        Ok(Err(e)) => warn!(?pid, "Error waiting for device shell: {}", e),
        Err(_) => {
            warn!(?pid, "Device shell ignored SIGTERM for {:?}; killing", grace);
            if let Err(e) = handle.child.kill().await {
                warn!(?pid, "Failed to kill device shell: {}", e);
            }
        }
    }

    match handle.streamer.stop().await {
        StreamEnd::ReadError(e) => warn!("Device output streamer failed: {}", e),
        end => debug!("Device output streamer stopped: {:?}", end),
    }
    info!(?pid, "Device shell has been shut down");
}

#[cfg(unix)]
fn request_terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid, "SIGTERM failed: {}", e);
    }
}

#[cfg(not(unix))]
fn request_terminate(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::channel_sink;
    use tokio::time::timeout;

    fn sh_shell(
        state: SessionState,
    ) -> (DeviceShell, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (sink, rx) = channel_sink();
        let mut config = DeviceShellConfig::new("sh");
        config.args = Vec::new();
        config.teardown_grace = Duration::from_millis(500);
        let shell = DeviceShell::new(config, state, sink, CancellationToken::new());
        (shell, rx)
    }

    #[tokio::test]
    async fn test_send_without_shell_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _rx) = sh_shell(SessionState::new(dir.path()).unwrap());

        let err = shell.send("echo hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
        assert_eq!(shell.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_refuses_to_spawn_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState::new(dir.path()).unwrap();
        let (shell, _rx) = sh_shell(state.clone());

        state.stop();
        assert!(!shell.ensure_started().await);
        assert_eq!(shell.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _rx) = channel_sink();
        let shell = DeviceShell::new(
            DeviceShellConfig::new("/nonexistent/remcon-device-binary"),
            SessionState::new(dir.path()).unwrap(),
            sink,
            CancellationToken::new(),
        );

        assert!(!shell.ensure_started().await);
        assert_eq!(shell.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (shell, _rx) = sh_shell(SessionState::new(dir.path()).unwrap());

        shell.teardown().await;
        assert!(shell.ensure_started().await);
        assert!(shell.is_alive().await);

        timeout(Duration::from_secs(5), shell.teardown()).await.unwrap();
        timeout(Duration::from_secs(5), shell.teardown()).await.unwrap();
        assert!(!shell.is_alive().await);
    }
}
