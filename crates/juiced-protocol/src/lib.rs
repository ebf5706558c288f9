//! Wire types for the channel server.
//!
//! The server speaks Engine.IO v4 with Socket.IO framing on top. A session
//! starts with a polling handshake (see [`Handshake`]), upgrades to a
//! websocket with the [`PROBE`]/[`PROBE_ACK`] exchange, then exchanges text
//! frames decoded by [`Packet::decode`].
//!
//! ```rust
//! use juiced_protocol::{Packet, encode_event};
//! use serde_json::json;
//!
//! let frame = encode_event("chatMsg", &json!({"msg": "hi"}));
//! assert_eq!(frame, r#"42["chatMsg",{"msg":"hi"}]"#);
//!
//! let Packet::Event { name, data } = Packet::decode(&frame).unwrap() else {
//!     unreachable!()
//! };
//! assert_eq!(name, "chatMsg");
//! assert_eq!(data["msg"], "hi");
//! ```

mod error;
mod handshake;
mod packet;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use handshake::{
    handshake_url, websocket_url, Handshake, DEFAULT_KEEPALIVE, MIN_KEEPALIVE,
};
pub use packet::{encode_event, encode_pong, Packet, CONNECT, PROBE, PROBE_ACK, UPGRADE};
pub use types::{socket_config_url, ServerEntry, SocketConfig};
