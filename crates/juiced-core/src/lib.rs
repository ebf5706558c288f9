//! Core types: channel state, permissions, media links, tracing

pub mod channel;
pub mod error;
pub mod media_link;
pub mod playlist;
pub mod tracing;
pub mod user;

pub use channel::Channel;
pub use error::{MediaLinkError, PermissionError, PlaylistError, UserListError};
pub use media_link::MediaLink;
pub use playlist::{Playlist, PlaylistItem, Position};
pub use tracing::{init_tracing, parse_level, TracingConfig, TracingError, TracingOutputFormat};
pub use user::{User, UserList, UserMeta, UserProfile, RANK_ANONYMOUS};
