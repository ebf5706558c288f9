//! Shared room state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use juiced_core::{Channel, User};

/// The channel mirror plus the identity the bot acts as.
#[derive(Debug, Clone)]
pub struct Room {
    pub channel: Channel,
    pub user: User,
}

impl Room {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: Channel::new(channel),
            user: User::anonymous(),
        }
    }

    /// The acting user as seen in the user list, with the rank the server
    /// granted via `rank`.
    pub fn me(&self) -> User {
        let mut me = self
            .channel
            .userlist
            .get(&self.user.name)
            .cloned()
            .unwrap_or_else(|_| self.user.clone());
        me.rank = self.user.rank;
        me
    }

    /// Whether the acting user currently holds the leader role.
    pub fn is_leader(&self) -> bool {
        self.channel
            .userlist
            .leader()
            .is_some_and(|leader| !self.user.name.is_empty() && leader.name == self.user.name)
    }
}

/// Room state shared by the handlers, the actions and the background tasks.
///
/// Critical sections never span an await.
#[derive(Debug, Clone)]
pub struct RoomState {
    inner: Arc<RwLock<Room>>,
}

impl RoomState {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Room::new(channel))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Room> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Room> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> Room {
        self.read().clone()
    }
}
