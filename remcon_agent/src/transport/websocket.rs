//! Socket.IO client over a single WebSocket.
//!
//! [`SocketIoConnection::connect`] performs the Engine.IO open and the namespace
//! connect inline, then splits the socket into two tasks:
//!
//! - the **reader** answers pings immediately and forwards `execute_command` events as
//!   [`InboundEvent::Command`] in arrival order,
//! - the **writer** owns the sink and drains an unbounded queue of frames, so
//!   `send_output` never blocks on the network.
//!
//! Losing the link in either task produces an [`InboundEvent::Disconnected`].

use super::packet::{self, EnginePacket, SocketPacket};
use super::{InboundEvent, OutputSink};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for each I/O task before abandoning it.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A live Socket.IO session.
pub struct SocketIoConnection {
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketIoConnection {
    /// Connect to `server_url` (an `http(s)://` or `ws(s)://` Socket.IO base URL).
    ///
    /// Returns once the default namespace has acknowledged the connect, together with
    /// the receiver for inbound events.
    pub async fn connect(
        server_url: &str,
        connect_timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<InboundEvent>)> {
        let endpoint = packet::socket_io_url(server_url)?;
        info!("Connecting to {}", endpoint);

        let ws = tokio::time::timeout(connect_timeout, async {
            let (mut ws, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
                .await
                .map_err(|e| AgentError::Transport(format!("websocket connect failed: {e}")))?;
            handshake(&mut ws).await?;
            Ok::<_, AgentError>(ws)
        })
        .await
        .map_err(|_| {
            AgentError::Transport(format!(
                "no Socket.IO handshake within {}s",
                connect_timeout.as_secs()
            ))
        })??;

        info!("Connected to server at {}", server_url);

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(writer_loop(
            sink,
            outbound_rx,
            inbound_tx.clone(),
            connected.clone(),
            cancel.clone(),
        ));
        let reader = tokio::spawn(reader_loop(
            stream,
            outbound_tx.clone(),
            inbound_tx,
            connected.clone(),
            cancel.clone(),
        ));

        let connection = Arc::new(Self {
            outbound: outbound_tx,
            connected,
            cancel,
            tasks: Mutex::new(vec![reader, writer]),
        });
        Ok((connection, inbound_rx))
    }

    fn queue(&self, frame: String) -> Result<()> {
        if !self.is_connected() {
            return Err(AgentError::TransportDisconnected(
                "socket is closed".to_string(),
            ));
        }
        self.outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| AgentError::TransportDisconnected("writer stopped".to_string()))
    }
}

#[async_trait]
impl OutputSink for SocketIoConnection {
    async fn send_output(&self, output: String) -> Result<()> {
        let frame = packet::encode_output(&output)?;
        self.queue(frame)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Socket task ended abnormally: {}", e),
                Err(_) => warn!("Socket task did not stop within {:?}", TASK_JOIN_TIMEOUT),
            }
        }
        debug!("Socket.IO connection closed");
    }
}

/// Wait for the engine open packet, request the default namespace and wait for its ack.
async fn handshake(ws: &mut WsStream) -> Result<()> {
    let mut opened = false;
    while let Some(message) = ws.next().await {
        let message =
            message.map_err(|e| AgentError::Transport(format!("handshake read failed: {e}")))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                return Err(AgentError::TransportDisconnected(
                    "server closed during handshake".to_string(),
                ));
            }
            _ => continue,
        };

        match packet::decode(text.as_str())? {
            EnginePacket::Open(handshake) => {
                debug!("Engine.IO open: {}", handshake);
                opened = true;
                send_text(ws, packet::NAMESPACE_CONNECT.to_string()).await?;
            }
            EnginePacket::Ping(payload) => {
                send_text(ws, packet::encode_pong(&payload)).await?;
            }
            EnginePacket::Message(SocketPacket::Connect(_)) if opened => return Ok(()),
            EnginePacket::Message(SocketPacket::ConnectError(reason)) => {
                return Err(AgentError::Transport(format!(
                    "namespace connect refused: {reason}"
                )));
            }
            EnginePacket::Close => {
                return Err(AgentError::TransportDisconnected(
                    "server closed during handshake".to_string(),
                ));
            }
            other => debug!("Ignoring packet during handshake: {:?}", other),
        }
    }
    Err(AgentError::TransportDisconnected(
        "stream ended during handshake".to_string(),
    ))
}

async fn send_text(ws: &mut WsStream, frame: String) -> Result<()> {
    ws.send(Message::Text(frame.into()))
        .await
        .map_err(|e| AgentError::Transport(format!("handshake write failed: {e}")))
}

async fn writer_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
            next = outbound.recv() => {
                let Some(message) = next else { break };
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket write failed: {}", e);
                    if connected.swap(false, Ordering::SeqCst) {
                        let _ = inbound.send(InboundEvent::Disconnected(format!("write failed: {e}")));
                    }
                    break;
                }
            }
        }
    }
    debug!("WebSocket writer stopped");
}

async fn reader_loop(
    mut stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => break Some(format!("read failed: {e}")),
            None => break Some("stream ended".to_string()),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => break Some(format!("server closed the socket: {frame:?}")),
            _ => continue,
        };

        let packet = match packet::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                continue;
            }
        };

        match packet {
            EnginePacket::Ping(payload) => {
                let _ = outbound.send(Message::Text(packet::encode_pong(&payload).into()));
            }
            EnginePacket::Message(SocketPacket::Event { name, args }) => {
                match packet::command_from_event(&name, &args) {
                    Some(command) => {
                        debug!("Received command: {}", command);
                        if inbound.send(InboundEvent::Command(command)).is_err() {
                            break None;
                        }
                    }
                    None => debug!("Ignoring event '{}'", name),
                }
            }
            EnginePacket::Message(SocketPacket::Disconnect) => {
                break Some("server disconnected the namespace".to_string());
            }
            EnginePacket::Close => break Some("server closed the engine session".to_string()),
            other => debug!("Ignoring packet: {:?}", other),
        }
    };

    if let Some(reason) = reason {
        info!("Disconnected from server: {}", reason);
        if connected.swap(false, Ordering::SeqCst) {
            let _ = inbound.send(InboundEvent::Disconnected(reason));
        }
    }
    debug!("WebSocket reader stopped");
}
