//! # Remcon Agent
//!
//! A remote console agent. It connects to a control plane, receives commands and
//! runs each one either on the host (local mode) or in a persistent interactive shell
//! attached to a device (device mode, `adb shell` by default). Output goes back as it
//! is produced: local commands answer with one reply, device output is streamed line
//! by line.
//!
//! ## Architecture
//!
//! ```text
//! transport reader ──commands──▶ dispatch loop ──▶ CommandRouter ─┬─▶ LocalExecutor ──reply──┐
//!        ▲                                                        └─▶ DeviceShell            │
//!        │                                                               │ stdout/stderr     ▼
//!   engine pings                                                  OutputStreamer ──lines──▶ OutputSink
//! ```
//!
//! - **Local mode**: every command is a fresh `sh -c` child with a hard timeout. The
//!   working directory is tracked by the agent; `cd` never reaches a child process.
//! - **Device mode**: commands are written to one long-lived subprocess. If the
//!   subprocess has died it is restarted before the next command is written.
//! - **Shutdown**: signals and transport loss both go through [`lifecycle::Lifecycle`],
//!   which terminates the device shell (SIGTERM, then kill) and joins the streamer.
//!
//! ## Modules
//!
//! - **`agent`**: wiring and the dispatch loop.
//! - **`router`**: built-ins, mode routing, prompt and reply formatting.
//! - **`local_exec`**: one-shot host commands and `cd` handling.
//! - **`device`**: the interactive device shell and binary discovery.
//! - **`streamer`**: line reassembly and forwarding of device output.
//! - **`lifecycle`**: reentrant shutdown and signal handling.
//! - **`transport`**: the output seam and the Socket.IO client.
//! - **`config`**: CLI/TOML/environment configuration.
//! - **`shell`**: the `remcon_agent` command-line entry point.

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod local_exec;
pub mod router;
pub mod shell;
pub mod streamer;
pub mod transport;
pub mod utils;

pub use error::{AgentError, Result};
pub use remcon_common::{Mode, SessionState};
