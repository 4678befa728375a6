//! # Lifecycle Controller
//!
//! One shutdown path for every trigger (SIGINT, SIGTERM, transport disconnect, end of
//! the inbound stream, a stopped session). The first call does the work:
//!
//! 1. mark the session as stopped so nothing respawns the device shell,
//! 2. cancel the root token, which stops every output streamer,
//! 3. tear down the device shell (SIGTERM, grace period, kill),
//! 4. close the transport.
//!
//! Later or concurrent calls wait until that sequence has finished and return
//! without repeating it.

use crate::device::DeviceShell;
use crate::transport::OutputSink;
use remcon_common::SessionState;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    TransportDisconnected(String),
    InboundClosed,
    SessionStopped,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {name}"),
            ShutdownReason::TransportDisconnected(reason) => {
                write!(f, "transport disconnected: {reason}")
            }
            ShutdownReason::InboundClosed => write!(f, "inbound event stream closed"),
            ShutdownReason::SessionStopped => write!(f, "session stopped"),
        }
    }
}

pub struct Lifecycle {
    state: SessionState,
    root: CancellationToken,
    device: Option<Arc<DeviceShell>>,
    transport: Mutex<Option<Arc<dyn OutputSink>>>,
    started: AtomicBool,
    finished: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new(
        state: SessionState,
        root: CancellationToken,
        device: Option<Arc<DeviceShell>>,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            state,
            root,
            device,
            transport: Mutex::new(None),
            started: AtomicBool::new(false),
            finished,
        }
    }

    /// Register the transport to close during shutdown.
    pub fn attach_transport(&self, transport: Arc<dyn OutputSink>) {
        *self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Tear everything down. Returns `true` for the call that did the work.
    pub async fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress ({}); waiting", reason);
            self.finished().await;
            return false;
        }

        info!("Shutting down: {}", reason);
        self.state.stop();
        self.root.cancel();

        if let Some(device) = &self.device {
            device.teardown().await;
        }

        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(transport) = transport {
            transport.close().await;
        }

        self.finished.send_replace(true);
        info!("Shutdown complete");
        true
    }

    /// Resolves once a shutdown has completed.
    pub async fn finished(&self) {
        let mut rx = self.finished.subscribe();
        if rx.wait_for(|done| *done).await.is_err() {
            warn!("Shutdown notifier dropped");
        }
    }
}

/// Wait for SIGINT or (on Unix) SIGTERM and name the signal received.
pub async fn wait_for_signal() -> &'static str {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        _ = terminate() => "SIGTERM",
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
