//! Process-wide console session state.
//!
//! The console has exactly one session: which backend commands are routed to, the
//! working directory local commands run in, and whether the agent is still running.
//! The router mutates mode and directory; the lifecycle controller flips `running`.
//!
//! `running` lives in a `tokio::sync::watch` channel so background tasks can await the
//! stop instead of polling a flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use remcon_common::{Mode, SessionState};
//!
//! let state = SessionState::new(std::env::current_dir()?)?;
//! state.set_mode(Mode::Device);
//!
//! // elsewhere, in a background task
//! state.stopped().await;
//! ```

use crate::state_machine::StateMachine;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Execution backend that receives non-builtin commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Host shell, synchronous replies, tracked working directory.
    #[default]
    Local,
    /// Persistent interactive device shell, output streamed asynchronously.
    Device,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Device => "device",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected working-directory update. The previous directory is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionStateError {
    #[error("working directory must be absolute: {}", .0.display())]
    NotAbsolute(PathBuf),
    #[error("not an existing directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

#[derive(Debug)]
struct Console {
    mode: Mode,
    current_dir: PathBuf,
}

/// Cloneable handle to the single console session.
///
/// Clones share the same underlying state. Mode and directory are guarded by a
/// [`StateMachine`]; each is a single write so readers never observe a torn update.
#[derive(Clone)]
pub struct SessionState {
    console: Arc<StateMachine<Console>>,
    running: Arc<watch::Sender<bool>>,
    // Keeps the channel open even when no task is subscribed.
    _receiver: watch::Receiver<bool>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mode, current_dir) = self
            .console
            .read(|console| (console.mode, console.current_dir.clone()));
        f.debug_struct("SessionState")
            .field("mode", &mode)
            .field("current_dir", &current_dir)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SessionState {
    /// Create a running session in local mode rooted at `initial_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial_dir` is relative or does not exist.
    pub fn new(initial_dir: impl Into<PathBuf>) -> Result<Self, SessionStateError> {
        let initial_dir = initial_dir.into();
        validate_directory(&initial_dir)?;

        let (sender, receiver) = watch::channel(true);
        Ok(Self {
            console: Arc::new(StateMachine::new(Console {
                mode: Mode::Local,
                current_dir: initial_dir,
            })),
            running: Arc::new(sender),
            _receiver: receiver,
        })
    }

    pub fn mode(&self) -> Mode {
        self.console.read(|console| console.mode)
    }

    /// Switch backends. Returns the previous mode.
    pub fn set_mode(&self, mode: Mode) -> Mode {
        self.console
            .transition(|console| std::mem::replace(&mut console.mode, mode))
    }

    pub fn current_dir(&self) -> PathBuf {
        self.console.read(|console| console.current_dir.clone())
    }

    /// Replace the working directory after checking it is an existing absolute
    /// directory. On error the current directory is left untouched.
    pub fn set_current_dir(&self, dir: impl Into<PathBuf>) -> Result<(), SessionStateError> {
        let dir = dir.into();
        validate_directory(&dir)?;
        self.console.transition(|console| console.current_dir = dir);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Mark the session as stopped.
    ///
    /// Returns `true` only for the call that performed the transition, so callers can
    /// tell a first shutdown from a repeated one.
    pub fn stop(&self) -> bool {
        self.running.send_if_modified(|running| {
            if *running {
                *running = false;
                true
            } else {
                false
            }
        })
    }

    /// Resolve once the session has been stopped. Returns immediately if it already
    /// has.
    pub async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|running| !*running).await;
    }
}

fn validate_directory(dir: &Path) -> Result<(), SessionStateError> {
    if !dir.is_absolute() {
        return Err(SessionStateError::NotAbsolute(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(SessionStateError::NotADirectory(dir.to_path_buf()));
    }
    Ok(())
}
