//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing frames and handshake documents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A `42` frame whose body is not valid JSON.
    #[error("malformed event packet: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A `42` frame whose body is JSON but not `[name, ...]`.
    #[error("event packet is not a named array: {0}")]
    NotAnEvent(String),

    /// The handshake response carried no JSON object or no session id.
    #[error("no session in handshake response")]
    MissingHandshake,

    /// The socket config listed no servers.
    #[error("no servers in socket config")]
    NoServers,

    /// A URL could not be built or parsed.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
