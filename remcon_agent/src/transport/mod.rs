//! # Transport Boundary
//!
//! The agent talks to its control plane through two narrow seams:
//!
//! - **Inbound**: [`InboundEvent`]s delivered in order on an mpsc channel. Each
//!   `execute_command` event becomes an [`InboundEvent::Command`]; losing the link
//!   becomes [`InboundEvent::Disconnected`].
//! - **Outbound**: the [`OutputSink`] trait. Replies from the router and every line
//!   forwarded by the output streamer go through `send_output`, one `output` event per
//!   call.
//!
//! The production implementation is a Socket.IO client over WebSocket
//! ([`websocket::SocketIoConnection`]). [`ChannelOutputSink`] collects events on a
//! channel instead.

pub mod packet;
pub mod websocket;

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

/// An event received from the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `execute_command` with its `command` text.
    Command(String),
    /// The link is gone. Carries a human-readable reason.
    Disconnected(String),
}

/// Destination for `output` events.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one `{output}` event.
    async fn send_output(&self, output: String) -> Result<()>;

    /// Whether events can still be delivered.
    fn is_connected(&self) -> bool;

    /// Close the underlying link. Must be safe to call more than once.
    async fn close(&self);
}

/// Channel-backed sink. Every output event is pushed onto an unbounded channel.
pub struct ChannelOutputSink {
    sender: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl ChannelOutputSink {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl OutputSink for ChannelOutputSink {
    async fn send_output(&self, output: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::TransportDisconnected(
                "output channel closed".to_string(),
            ));
        }
        self.sender
            .send(output)
            .map_err(|_| AgentError::TransportDisconnected("receiver dropped".to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Create a channel-backed sink together with the receiving end.
pub fn channel_sink() -> (Arc<ChannelOutputSink>, mpsc::UnboundedReceiver<String>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(ChannelOutputSink::new(sender)), receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = channel_sink();

        sink.send_output("first".to_string()).await.unwrap();
        sink.send_output("second".to_string()).await.unwrap();

        let first = timeout(Duration::from_millis(100), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_millis(100), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(second.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_channel_sink_rejects_after_close() {
        let (sink, _rx) = channel_sink();
        assert!(sink.is_connected());

        sink.close().await;
        sink.close().await;

        assert!(!sink.is_connected());
        let err = sink.send_output("late".to_string()).await.unwrap_err();
        assert!(matches!(err, AgentError::TransportDisconnected(_)));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (sink, rx) = channel_sink();
        drop(rx);

        assert!(!sink.is_connected());
        assert!(sink.send_output("lost".to_string()).await.is_err());
    }
}
