//! Bot error types.

use std::io;

use juiced_core::{MediaLinkError, PermissionError};
use juiced_protocol::ProtocolError;
use thiserror::Error;

/// Result type for bot operations.
pub type BotResult<T> = Result<T, BotError>;

/// Errors that end a connection or a connect attempt.
///
/// Cloneable so the first terminal error of a connection can be handed to
/// every later caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Handshake, probe or upgrade failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer or the local side closed the connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// No ping arrived within ping interval + ping timeout.
    #[error("ping timeout")]
    PingTimeout,

    /// A socket or HTTP operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A shutdown request interrupted the operation.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    /// True for errors that mean the connection is gone, ping timeout included.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::PingTimeout)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}

/// Errors raised by the persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory: {0}")]
    Io(#[from] io::Error),

    /// The blocking worker running the call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),

    #[error("outbound message not found: {0}")]
    NotFound(i64),
}

/// Errors surfaced by the bot to its callers.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Server discovery failed.
    #[error("socket config error: {0}")]
    SocketConfig(String),

    #[error("login failed: {0}")]
    Login(String),

    /// The server kicked the bot from the channel.
    #[error("kicked: {0}")]
    Kicked(String),

    /// An action was rejected by the server or got no answer in time.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("permission denied: {0}")]
    Permission(#[from] PermissionError),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid media link: {0}")]
    MediaLink(#[from] MediaLinkError),

    #[error("proxy configuration error: {0}")]
    ProxyConfig(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BotError {
    pub fn login(message: impl Into<String>) -> Self {
        Self::Login(message.into())
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    pub fn socket_config(message: impl Into<String>) -> Self {
        Self::SocketConfig(message.into())
    }

    /// True for connection-level failures, which the run loop may recover
    /// from by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(e) if *e != TransportError::Cancelled)
    }
}
