//! Client error types.

use std::fmt;

use juiced_bot::{BotError, StoreError};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Secret reference could not be resolved.
    Secret(String),
    /// IO error.
    Io(std::io::Error),
    /// The bot stopped with an error.
    Bot(BotError),
    /// Database error.
    Store(StoreError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Secret(msg) => write!(f, "secret error: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Bot(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "database error: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Bot(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<BotError> for ClientError {
    fn from(err: BotError) -> Self {
        Self::Bot(err)
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
