//! One-shot command execution against the host, with working-directory tracking.
//!
//! Nothing persists between calls: every command is a fresh `sh -c` (or `cmd /C`)
//! child. `cd` is handled in-process because a child cannot change its parent's
//! directory.
//!
//! A command that ran is an `Ok` outcome even when it exited non-zero. Timeouts,
//! spawn failures and bad `cd` targets are errors; [`failure_text`] renders them as
//! the reply body.

use crate::error::{AgentError, Result};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default hard limit for a local command.
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one local command: the reply body and the working directory afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOutcome {
    pub output: String,
    pub cwd: PathBuf,
}

/// Runs commands through the host interpreter.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    timeout: Duration,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_TIMEOUT)
    }
}

impl LocalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Execute `command` with `cwd` as the working directory.
    ///
    /// `cwd` only changes for a successful `cd`. The child is killed if the returned
    /// future is dropped.
    pub async fn execute(&self, command: &str, cwd: &Path) -> Result<LocalOutcome> {
        if let Some(target) = parse_cd(command) {
            return change_directory(target, cwd);
        }

        let output = self.run_shell(command, cwd).await?;
        Ok(LocalOutcome {
            output,
            cwd: cwd.to_path_buf(),
        })
    }

    async fn run_shell(&self, command: &str, cwd: &Path) -> Result<String> {
        let mut cmd = shell_command(command);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command, cwd = %cwd.display(), "Running local command");

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                tracing::warn!(command, "Local command timed out after {:?}", self.timeout);
                Err(AgentError::Timeout(self.timeout))
            }
            Ok(Err(source)) => Err(AgentError::SpawnFailure {
                program: SHELL_PROGRAM.to_string(),
                source,
            }),
            Ok(Ok(output)) => {
                let text = combine_output(&output.stdout, &output.stderr);
                if !output.status.success() {
                    let status = match output.status.code() {
                        Some(code) => format!("exit status {code}"),
                        None => "terminated by signal".to_string(),
                    };
                    Ok(format!("Error executing command: {status}\nOutput: {text}"))
                } else if text.is_empty() {
                    Ok(format!(
                        "Command executed (exit code: {})",
                        output.status.code().unwrap_or(0)
                    ))
                } else {
                    Ok(text)
                }
            }
        }
    }
}

/// Reply body for a failed local command.
pub fn failure_text(error: &AgentError) -> String {
    match error {
        AgentError::Timeout(limit) => format!("Command timed out ({}s limit)", limit.as_secs()),
        AgentError::DirectoryNotFound(target) => {
            format!("cd: {}: No such file or directory", target.display())
        }
        AgentError::SpawnFailure { source, .. } => format!("Error executing command: {source}"),
        other => format!("Error executing command: {other}"),
    }
}

#[cfg(windows)]
const SHELL_PROGRAM: &str = "cmd";

#[cfg(not(windows))]
const SHELL_PROGRAM: &str = "sh";

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(SHELL_PROGRAM);
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(SHELL_PROGRAM);
    cmd.arg("-c").arg(command);
    cmd
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, _) => stderr.into_owned(),
        (false, true) => stdout.into_owned(),
        (false, false) if stdout.ends_with('\n') => format!("{stdout}{stderr}"),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

/// Recognize `cd` and `cd <target>`. Returns the (possibly empty) target.
fn parse_cd(command: &str) -> Option<&str> {
    let rest = command.strip_prefix("cd")?;
    if rest.is_empty() {
        Some("")
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// `DirectoryNotFound` carries the target as typed, or the home path for a bare `cd`.
fn change_directory(target: &str, cwd: &Path) -> Result<LocalOutcome> {
    let Some(resolved) = resolve_target(target, cwd, dirs::home_dir().as_deref()) else {
        return Err(AgentError::DirectoryNotFound(PathBuf::from(target)));
    };

    if resolved.is_dir() {
        tracing::debug!(from = %cwd.display(), to = %resolved.display(), "Changed directory");
        Ok(LocalOutcome {
            output: format!("Changed directory to: {}", resolved.display()),
            cwd: resolved,
        })
    } else if target.is_empty() {
        Err(AgentError::DirectoryNotFound(resolved))
    } else {
        Err(AgentError::DirectoryNotFound(PathBuf::from(target)))
    }
}

/// Resolve a `cd` target to an absolute, lexically normalized path.
///
/// Empty targets and `~` go to `home`; `~/x` is relative to `home`; other relative
/// targets are relative to `cwd`. Returns `None` when `home` is needed but unknown.
pub fn resolve_target(target: &str, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let joined = if target.is_empty() || target == "~" {
        home?.to_path_buf()
    } else if let Some(rest) = target.strip_prefix("~/") {
        home?.join(rest)
    } else {
        let path = Path::new(target);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        }
    };
    Some(normalize_lexically(&joined))
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack
                    .last()
                    .is_some_and(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                {
                    stack.pop();
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}
