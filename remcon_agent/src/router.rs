//! # Command Router
//!
//! Every inbound command goes through [`CommandRouter::dispatch`]. Built-ins are
//! matched first in any mode; everything else goes to the backend for the current
//! mode:
//!
//! | mode   | backend          | reply                                       |
//! |--------|------------------|---------------------------------------------|
//! | local  | [`LocalExecutor`] | synchronous, always ends with the prompt   |
//! | device | [`DeviceShell`]   | none; output arrives through the streamer  |
//!
//! Dispatch never fails: errors and panics inside a command become an
//! `Error: ...` reply followed by the prompt.

use crate::device::DeviceShell;
use crate::error::Result;
use crate::local_exec::{LocalExecutor, failure_text};
use futures::FutureExt;
use remcon_common::{Mode, SessionState};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BANNER_TITLE: &str = "Multi-Terminal Remote Console";
const DEVICE_UNAVAILABLE: &str =
    "Device shell not available. Install adb or start the agent with --device-binary.";

pub struct CommandRouter {
    state: SessionState,
    local: LocalExecutor,
    device: Option<Arc<DeviceShell>>,
}

impl CommandRouter {
    /// `device` is `None` when no device-shell binary was found.
    pub fn new(state: SessionState, local: LocalExecutor, device: Option<Arc<DeviceShell>>) -> Self {
        Self {
            state,
            local,
            device,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// `local:<dir>$ ` or `device$ `, computed from the current state.
    pub fn prompt(&self) -> String {
        match self.state.mode() {
            Mode::Local => {
                let cwd = self.state.current_dir();
                let name = cwd
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| cwd.display().to_string());
                format!("local:{name}$ ")
            }
            Mode::Device => "device$ ".to_string(),
        }
    }

    /// Sent once after the transport connects.
    pub fn welcome_banner(&self) -> String {
        let mut commands = vec!["'mode local'"];
        if self.has_device() {
            commands.push("'mode device'");
        }
        commands.push("'help'");
        format!(
            "{BANNER_TITLE}\nMode: {}\nCommands: {}\n{}",
            self.state.mode(),
            commands.join(", "),
            self.prompt()
        )
    }

    pub fn help_text(&self) -> String {
        let mut lines = vec![
            "Available commands:",
            "- mode local: Switch to local terminal mode",
        ];
        if self.has_device() {
            lines.push("- mode device (or mode adb): Switch to device shell mode");
        }
        lines.push("- help: Show this help");
        lines.push("- pwd: Show the current directory (forwarded in device mode)");
        lines.push("- Any system command (in local mode)");
        if self.has_device() {
            lines.push("- Any device shell command (in device mode)");
        }
        lines.join("\n")
    }

    /// Handle one command. Returns the synchronous reply, if one is owed.
    pub async fn dispatch(&self, raw: &str) -> Option<String> {
        let command = raw.trim();
        debug!(mode = %self.state.mode(), "Dispatching command: {}", command);

        match AssertUnwindSafe(self.route(command)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(category = e.category(), "Command failed: {}", e);
                Some(self.reply(&format!("Error: {e}")))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Command panicked: {}", message);
                Some(self.reply(&format!("Error: {message}")))
            }
        }
    }

    async fn route(&self, command: &str) -> Result<Option<String>> {
        if command.is_empty() {
            return Ok(Some(self.prompt()));
        }

        match command {
            "mode local" => {
                self.state.set_mode(Mode::Local);
                info!("Switched to local mode");
                return Ok(Some(self.reply("Switched to local mode")));
            }
            "mode device" | "mode adb" => {
                if !self.has_device() {
                    return Ok(Some(self.reply(DEVICE_UNAVAILABLE)));
                }
                self.state.set_mode(Mode::Device);
                info!("Switched to device mode");
                return Ok(Some(self.reply("Switched to device mode")));
            }
            "help" => return Ok(Some(self.reply(&self.help_text()))),
            "pwd" if self.state.mode() == Mode::Local => {
                let cwd = self.state.current_dir();
                return Ok(Some(self.reply(&cwd.display().to_string())));
            }
            _ => {}
        }

        match self.state.mode() {
            Mode::Local => self.run_local(command).await.map(Some),
            Mode::Device => Ok(self.run_device(command).await),
        }
    }

    async fn run_local(&self, command: &str) -> Result<String> {
        let cwd = self.state.current_dir();
        match self.local.execute(command, &cwd).await {
            Ok(outcome) => {
                if outcome.cwd != cwd {
                    self.state.set_current_dir(outcome.cwd)?;
                }
                Ok(self.reply(&outcome.output))
            }
            Err(e) => {
                debug!(category = e.category(), "Local command failed: {}", e);
                Ok(self.reply(&failure_text(&e)))
            }
        }
    }

    async fn run_device(&self, command: &str) -> Option<String> {
        let Some(device) = &self.device else {
            return Some(self.reply(DEVICE_UNAVAILABLE));
        };

        if !device.ensure_started().await {
            return Some(self.reply("Failed to start device shell"));
        }

        let first = match device.send(command).await {
            Ok(()) => return None,
            Err(e) => e,
        };

        warn!("Write to device shell failed ({}); restarting it", first);
        device.teardown().await;
        if !device.ensure_started().await {
            return Some(self.reply(&format!(
                "Failed to send command to device shell: {first}"
            )));
        }
        match device.send(command).await {
            Ok(()) => None,
            Err(e) => Some(self.reply(&format!(
                "Failed to send command to device shell: {e}"
            ))),
        }
    }

    /// `<body>\n<prompt>` with trailing newlines of `body` removed.
    fn reply(&self, body: &str) -> String {
        format!("{}\n{}", body.trim_end_matches(['\n', '\r']), self.prompt())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "command handler panicked".to_string()
    }
}
