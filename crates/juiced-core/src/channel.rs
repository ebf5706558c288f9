//! Channel state and permission checks.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::PermissionError;
use crate::playlist::Playlist;
use crate::user::{User, UserList};

/// Mirror of one channel as reported by the server.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub name: String,
    pub motd: String,
    /// Raw `channelOpts` object.
    pub options: Map<String, Value>,
    /// Minimum rank per action, from `setPermissions`.
    pub permissions: HashMap<String, f64>,
    pub userlist: UserList,
    pub playlist: Playlist,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Replaces the permission table from a `setPermissions` payload,
    /// skipping non-numeric entries.
    pub fn set_permissions(&mut self, table: &Value) {
        self.permissions = table
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(action, rank)| Some((action.clone(), rank.as_f64()?)))
                    .collect()
            })
            .unwrap_or_default();
    }

    /// Fails if `action` is unknown or `user` ranks below its requirement.
    pub fn check_permission(&self, action: &str, user: &User) -> Result<(), PermissionError> {
        let required = *self
            .permissions
            .get(action)
            .ok_or_else(|| PermissionError::UnknownAction(action.to_string()))?;
        if user.rank < required {
            return Err(PermissionError::Denied {
                action: action.to_string(),
                required,
                rank: user.rank,
            });
        }
        Ok(())
    }

    pub fn has_permission(&self, action: &str, user: &User) -> bool {
        self.check_permission(action, user).is_ok()
    }

    /// Permission name for a playlist action.
    ///
    /// An unlocked playlist is governed by the `o`-prefixed ("open playlist") entries.
    pub fn playlist_action(&self, action: &str) -> String {
        if self.playlist.locked {
            action.to_string()
        } else {
            format!("o{action}")
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<channel \"{}\">", self.name)
    }
}
