//! Shared helpers for remcon_agent integration tests.
#![allow(dead_code)]

use remcon_agent::device::{DeviceShell, DeviceShellConfig};
use remcon_agent::local_exec::LocalExecutor;
use remcon_agent::router::CommandRouter;
use remcon_agent::transport::{ChannelOutputSink, channel_sink};
use remcon_agent::utils::logging::init_test_logging;
use remcon_common::SessionState;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// `sh` reading commands from stdin, standing in for `adb shell`.
pub fn sh_device_config() -> DeviceShellConfig {
    let mut config = DeviceShellConfig::new("sh");
    config.args = Vec::new();
    config.teardown_grace = Duration::from_millis(500);
    config
}

pub struct Harness {
    pub state: SessionState,
    pub router: CommandRouter,
    pub device: Option<Arc<DeviceShell>>,
    pub sink: Arc<ChannelOutputSink>,
    pub output: UnboundedReceiver<String>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn local(dir: &Path, timeout: Duration) -> Self {
        Self::build(dir, timeout, None)
    }

    pub fn with_device(dir: &Path, config: DeviceShellConfig) -> Self {
        Self::build(dir, Duration::from_secs(30), Some(config))
    }

    fn build(dir: &Path, timeout: Duration, device: Option<DeviceShellConfig>) -> Self {
        init_test_logging();
        let state = SessionState::new(dir).expect("tempdir is an absolute directory");
        let (sink, output) = channel_sink();
        let cancel = CancellationToken::new();
        let device = device.map(|config| {
            Arc::new(DeviceShell::new(
                config,
                state.clone(),
                sink.clone(),
                cancel.child_token(),
            ))
        });
        let router = CommandRouter::new(state.clone(), LocalExecutor::new(timeout), device.clone());
        Self {
            state,
            router,
            device,
            sink,
            output,
            cancel,
        }
    }

    /// Next streamed line, failing the test after [`RECV_TIMEOUT`].
    pub async fn next_output(&mut self) -> String {
        tokio::time::timeout(RECV_TIMEOUT, self.output.recv())
            .await
            .expect("timed out waiting for output")
            .expect("output channel closed")
    }

    /// Assert nothing else arrives within `quiet`.
    pub async fn assert_quiet(&mut self, quiet: Duration) {
        if let Ok(Some(extra)) = tokio::time::timeout(quiet, self.output.recv()).await {
            panic!("unexpected extra output: {extra:?}");
        }
    }
}

pub fn prompt_for(dir: &Path) -> String {
    format!(
        "local:{}$ ",
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string())
    )
}
