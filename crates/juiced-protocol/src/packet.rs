//! Text frame grammar.
//!
//! Every frame starts with an Engine.IO packet type digit; message frames
//! (`4`) carry a second Socket.IO digit:
//!
//! ```text
//! 2<payload>        ping          -> answer with 3<payload>
//! 3<payload>        pong
//! 40[{...}]         connect ack   -> event "" with no data
//! 41<name>          bare name     -> event <name> with no data
//! 42[name, ...]     event         -> event <name> with the arguments
//! ```

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Sent after the handshake to test the websocket.
pub const PROBE: &str = "2probe";
/// The only acceptable answer to [`PROBE`].
pub const PROBE_ACK: &str = "3probe";
/// Completes the transport upgrade.
pub const UPGRADE: &str = "5";
/// Joins the default namespace.
pub const CONNECT: &str = "40";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Ping(String),
    Pong(String),
    Event { name: String, data: Value },
    /// A frame of a type the client does not handle.
    Unknown(String),
}

impl Packet {
    /// Decodes one text frame.
    ///
    /// Unrecognised frames decode to [`Packet::Unknown`]; only a broken `42`
    /// body is an error.
    pub fn decode(frame: &str) -> ProtocolResult<Self> {
        if let Some(payload) = frame.strip_prefix('2') {
            return Ok(Self::Ping(payload.to_string()));
        }
        if let Some(payload) = frame.strip_prefix('3') {
            return Ok(Self::Pong(payload.to_string()));
        }
        if let Some(body) = frame.strip_prefix("42") {
            return decode_event(body);
        }
        if let Some(name) = frame.strip_prefix("41") {
            return Ok(Self::Event {
                name: name.to_string(),
                data: Value::Null,
            });
        }
        if let Some(rest) = frame.strip_prefix("40")
            && (rest.is_empty() || rest.starts_with('{'))
        {
            return Ok(Self::Event {
                name: String::new(),
                data: Value::Null,
            });
        }
        Ok(Self::Unknown(frame.to_string()))
    }
}

fn decode_event(body: &str) -> ProtocolResult<Packet> {
    let value: Value = serde_json::from_str(body)?;
    let Value::Array(mut args) = value else {
        return Err(ProtocolError::NotAnEvent(body.to_string()));
    };
    if args.is_empty() {
        return Err(ProtocolError::NotAnEvent(body.to_string()));
    }
    let Value::String(name) = args.remove(0) else {
        return Err(ProtocolError::NotAnEvent(body.to_string()));
    };
    let data = match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    };
    Ok(Packet::Event { name, data })
}

/// Encodes an outbound event as `42[name, data]`.
///
/// A null payload is sent as `42[name]`.
pub fn encode_event(name: &str, data: &Value) -> String {
    let frame = if data.is_null() {
        Value::Array(vec![Value::String(name.to_string())])
    } else {
        Value::Array(vec![Value::String(name.to_string()), data.clone()])
    };
    format!("42{frame}")
}

/// Encodes the answer to an inbound ping.
pub fn encode_pong(payload: &str) -> String {
    format!("3{payload}")
}
