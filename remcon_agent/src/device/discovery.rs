//! Locating the device-shell executable.
//!
//! Order: an explicit path from configuration, then `adb/` and `platform-tools/` next
//! to the agent executable, then the bare program name resolved through `PATH`.
//! Bundled and `PATH` candidates must answer `<candidate> version` with exit code 0
//! within the probe timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_PROGRAM_NAME: &str = "adb";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Subdirectories of the executable's directory searched for a bundled binary.
const BUNDLED_DIRS: [&str; 2] = ["adb", "platform-tools"];

#[derive(Debug, Clone)]
pub struct DeviceDiscovery {
    /// Explicit binary; accepted without probing.
    pub explicit: Option<PathBuf>,
    /// Directory holding the agent executable, if known.
    pub exe_dir: Option<PathBuf>,
    /// Name looked up on `PATH` and inside the bundled directories.
    pub program_name: String,
    pub probe_timeout: Duration,
}

impl Default for DeviceDiscovery {
    fn default() -> Self {
        Self {
            explicit: None,
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl DeviceDiscovery {
    /// Bundled locations in search order. Both the plain and `.exe` names are listed.
    pub fn bundled_candidates(&self) -> Vec<PathBuf> {
        let Some(exe_dir) = &self.exe_dir else {
            return Vec::new();
        };
        BUNDLED_DIRS
            .iter()
            .flat_map(|dir| {
                [
                    exe_dir.join(dir).join(&self.program_name),
                    exe_dir.join(dir).join(format!("{}.exe", self.program_name)),
                ]
            })
            .collect()
    }

    /// Find a usable device-shell binary, or `None`.
    pub async fn discover(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.explicit {
            info!("Using configured device binary: {}", explicit.display());
            return Some(explicit.clone());
        }

        for candidate in self.bundled_candidates() {
            if !candidate.is_file() {
                continue;
            }
            if probe(&candidate, self.probe_timeout).await {
                info!("Using bundled device binary: {}", candidate.display());
                return Some(candidate);
            }
        }

        let on_path = PathBuf::from(&self.program_name);
        if probe(&on_path, self.probe_timeout).await {
            info!("Using '{}' from PATH", self.program_name);
            return Some(on_path);
        }

        warn!(
            "Device binary '{}' not found. Install it on PATH or place it in 'adb/' or 'platform-tools/' next to the agent",
            self.program_name
        );
        None
    }
}

/// Run `<program> version` and report whether it exited successfully in time.
pub async fn probe(program: &Path, probe_timeout: Duration) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match timeout(probe_timeout, cmd.status()).await {
        Ok(Ok(status)) => {
            debug!(program = %program.display(), ?status, "Probe finished");
            status.success()
        }
        Ok(Err(e)) => {
            debug!(program = %program.display(), "Probe failed to start: {}", e);
            false
        }
        Err(_) => {
            warn!(
                program = %program.display(),
                "Probe did not finish within {:?}", probe_timeout
            );
            false
        }
    }
}
