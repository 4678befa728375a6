//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only the subset the agent needs is understood: engine open/close/ping/pong/noop and
//! Socket.IO connect, disconnect, connect-error and event packets on any namespace.
//! Binary attachments are not supported; such packets decode to
//! [`SocketPacket::Unsupported`] and are ignored by the connection.

use crate::error::{AgentError, Result};
use serde_json::{Value, json};
use url::Url;

/// Inbound event carrying `{command}`.
pub const EXECUTE_COMMAND_EVENT: &str = "execute_command";
/// Outbound event carrying `{output}`.
pub const OUTPUT_EVENT: &str = "output_from_client";
/// Socket.IO connect to the default namespace.
pub const NAMESPACE_CONNECT: &str = "40";

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake with `sid`, `pingInterval`, `pingTimeout`.
    Open(Value),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// One Socket.IO packet carried inside an engine message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
    /// Acks and binary packets. The type digit is kept for logging.
    Unsupported(char),
}

/// Decode a text frame into an engine packet.
pub fn decode(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| AgentError::Transport("empty engine frame".to_string()))?;
    let body = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(parse_json_or_null(body)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(body.to_string())),
        '3' => Ok(EnginePacket::Pong(body.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket(body)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(AgentError::Transport(format!(
            "unknown engine packet type '{other}'"
        ))),
    }
}

fn decode_socket(body: &str) -> Result<SocketPacket> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| AgentError::Transport("empty socket packet".to_string()))?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' => {
            let payload = parse_json_or_null(rest)?;
            Ok(SocketPacket::Connect((!payload.is_null()).then_some(payload)))
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut items = match serde_json::from_str::<Value>(rest)? {
                Value::Array(items) => items,
                other => {
                    return Err(AgentError::Transport(format!(
                        "event payload is not an array: {other}"
                    )));
                }
            };
            if items.is_empty() {
                return Err(AgentError::Transport("event without a name".to_string()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(AgentError::Transport(format!(
                        "event name is not a string: {other}"
                    )));
                }
            };
            Ok(SocketPacket::Event { name, args: items })
        }
        '4' => Ok(SocketPacket::ConnectError(parse_json_or_null(rest)?)),
        other => Ok(SocketPacket::Unsupported(other)),
    }
}

/// Drop a leading `/namespace,` if present.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

fn parse_json_or_null(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(body)?)
    }
}

/// Encode a Socket.IO event on the default namespace: `42["name",payload]`.
pub fn encode_event(name: &str, payload: &Value) -> Result<String> {
    let body = serde_json::to_string(&json!([name, payload]))?;
    Ok(format!("42{body}"))
}

/// Encode an `output_from_client` event.
pub fn encode_output(output: &str) -> Result<String> {
    encode_event(OUTPUT_EVENT, &json!({ "output": output }))
}

/// Engine pong answering a ping with the same payload.
pub fn encode_pong(payload: &str) -> String {
    format!("3{payload}")
}

/// Extract the command text from an `execute_command` event.
///
/// Returns `None` for other events and for payloads without a string `command`.
pub fn command_from_event(name: &str, args: &[Value]) -> Option<String> {
    if name != EXECUTE_COMMAND_EVENT {
        return None;
    }
    args.first()
        .and_then(|data| data.get("command"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Build the WebSocket endpoint for a Socket.IO server URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; the path is replaced with
/// `/socket.io/` and `EIO=4&transport=websocket` is set on the query.
pub fn socket_io_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| AgentError::Config(format!("invalid server URL '{server_url}': {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(AgentError::Config(format!(
                "unsupported server URL scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AgentError::Config(format!("cannot use scheme '{scheme}' for {server_url}")))?;
    url.set_path("/socket.io/");

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "EIO" && key != "transport")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        query.append_pair("EIO", "4");
        query.append_pair("transport", "websocket");
    }

    Ok(url)
}
