//! Error types for room state containers.

use thiserror::Error;

/// Errors raised by permission checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PermissionError {
    /// The channel's permission table has no entry for this action.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The user's rank is below what the action requires.
    #[error("{action}: rank {rank} is below required rank {required}")]
    Denied {
        action: String,
        required: f64,
        rank: f64,
    },

    /// A condition other than rank blocks the action.
    #[error("{0}")]
    Refused(String),
}

impl PermissionError {
    /// Creates a refusal that is not tied to the permission table.
    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused(message.into())
    }
}

/// Errors raised by the user list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserListError {
    /// A user with this name is already present.
    #[error("user already exists: {0}")]
    Duplicate(String),

    /// No user with this name is present.
    #[error("user not found: {0}")]
    NotFound(String),
}

/// Errors raised while classifying media URLs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaLinkError {
    /// The URL could not be parsed at all.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Direct media files must be served over HTTPS.
    #[error("raw files must be served over https: {0}")]
    InsecureFile(String),

    /// The URL does not belong to a supported media source.
    #[error("unsupported media URL: {0}")]
    Unsupported(String),
}

/// Errors raised by the playlist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaylistError {
    #[error("playlist item not found: {0}")]
    NotFound(u64),

    #[error("invalid playlist item: {0}")]
    InvalidItem(String),
}
