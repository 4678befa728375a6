//! Wiring: discovery, session state, transport, router and lifecycle.

use crate::config::AgentConfig;
use crate::device::discovery::DeviceDiscovery;
use crate::device::{DeviceShell, DeviceShellConfig};
use crate::error::{AgentError, Result};
use crate::lifecycle::{Lifecycle, ShutdownReason, wait_for_signal};
use crate::local_exec::LocalExecutor;
use crate::router::CommandRouter;
use crate::transport::websocket::SocketIoConnection;
use crate::transport::{InboundEvent, OutputSink};
use remcon_common::SessionState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Find the device-shell binary. Fails only when `require_device` is set.
pub async fn locate_device_binary(config: &AgentConfig) -> Result<Option<PathBuf>> {
    let discovery = DeviceDiscovery {
        explicit: config.device_binary.clone(),
        ..DeviceDiscovery::default()
    };
    match discovery.discover().await {
        Some(path) => Ok(Some(path)),
        None if config.require_device => Err(AgentError::DeviceUnavailable(format!(
            "'{}' was not found and --require-device is set",
            discovery.program_name
        ))),
        None => {
            warn!("Continuing in local-only mode");
            Ok(None)
        }
    }
}

/// Everything one session needs, built around a given output sink.
pub struct AgentParts {
    pub state: SessionState,
    pub router: CommandRouter,
    pub lifecycle: Arc<Lifecycle>,
}

impl AgentParts {
    pub fn build(
        config: &AgentConfig,
        state: SessionState,
        device_binary: Option<PathBuf>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let root = CancellationToken::new();
        let device = device_binary.map(|program| {
            let device_config = DeviceShellConfig {
                program,
                args: config.device_args.clone(),
                teardown_grace: config.teardown_grace,
                flush_partial: config.flush_partial,
            };
            Arc::new(DeviceShell::new(
                device_config,
                state.clone(),
                sink.clone(),
                root.child_token(),
            ))
        });

        let lifecycle = Arc::new(Lifecycle::new(state.clone(), root, device.clone()));
        lifecycle.attach_transport(sink);

        let router = CommandRouter::new(
            state.clone(),
            LocalExecutor::new(config.local_timeout),
            device,
        );

        Self {
            state,
            router,
            lifecycle,
        }
    }
}

/// Connect to the control plane and serve commands until shutdown.
pub async fn run(config: AgentConfig) -> Result<()> {
    let device_binary = locate_device_binary(&config).await?;
    let state = SessionState::new(std::env::current_dir()?)?;

    let (connection, inbound) =
        SocketIoConnection::connect(&config.server_url, config.connect_timeout).await?;
    let sink: Arc<dyn OutputSink> = connection;

    let parts = AgentParts::build(&config, state, device_binary, sink.clone());

    let lifecycle = parts.lifecycle.clone();
    let signals = tokio::spawn(async move {
        let signal = wait_for_signal().await;
        lifecycle.shutdown(ShutdownReason::Signal(signal)).await;
    });

    if let Err(e) = sink.send_output(parts.router.welcome_banner()).await {
        warn!("Failed to send welcome banner: {}", e);
    }

    let reason = serve(&parts.router, inbound, sink, &parts.lifecycle).await;
    signals.abort();
    info!("Agent stopped: {}", reason);
    Ok(())
}

/// Dispatch inbound commands in arrival order until the session ends.
///
/// Shutdown has completed when this returns.
pub async fn serve(
    router: &CommandRouter,
    mut inbound: mpsc::UnboundedReceiver<InboundEvent>,
    sink: Arc<dyn OutputSink>,
    lifecycle: &Lifecycle,
) -> ShutdownReason {
    let state = router.state().clone();

    let reason = loop {
        let event = tokio::select! {
            biased;
            _ = state.stopped() => break ShutdownReason::SessionStopped,
            event = inbound.recv() => event,
        };

        match event {
            Some(InboundEvent::Command(command)) => {
                // A stop abandons the command; dropping it kills a local child.
                let reply = tokio::select! {
                    biased;
                    _ = state.stopped() => break ShutdownReason::SessionStopped,
                    reply = router.dispatch(&command) => reply,
                };
                if let Some(reply) = reply
                    && let Err(e) = sink.send_output(reply).await
                {
                    warn!("Failed to send reply: {}", e);
                }
            }
            Some(InboundEvent::Disconnected(reason)) => {
                break ShutdownReason::TransportDisconnected(reason);
            }
            None => break ShutdownReason::InboundClosed,
        }
    };

    // Joins a shutdown already started elsewhere, e.g. by the signal watcher.
    lifecycle.shutdown(reason.clone()).await;
    reason
}
