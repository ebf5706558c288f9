//! Channel members and the user list.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UserListError;

/// Rank used for a user that is not logged in.
pub const RANK_ANONYMOUS: f64 = -1.0;

/// Profile shown next to a user's name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub image: String,
    pub text: String,
}

/// Moderation flags and aliases reported by `setUserMeta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMeta {
    pub afk: bool,
    pub muted: bool,
    /// Shadow-muted: the user's messages are only shown to moderators.
    pub smuted: bool,
    pub aliases: Vec<String>,
    pub ip: Option<String>,
}

impl UserMeta {
    /// Merges the keys present in a partial meta object, leaving the rest alone.
    pub fn update(&mut self, partial: &Value) {
        let Some(obj) = partial.as_object() else {
            return;
        };
        if let Some(afk) = obj.get("afk").and_then(Value::as_bool) {
            self.afk = afk;
        }
        if let Some(muted) = obj.get("muted").and_then(Value::as_bool) {
            self.muted = muted;
        }
        if let Some(smuted) = obj.get("smuted").and_then(Value::as_bool) {
            self.smuted = smuted;
        }
        if let Some(aliases) = obj.get("aliases").and_then(Value::as_array) {
            self.aliases = aliases
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(ip) = obj.get("ip") {
            self.ip = ip.as_str().map(str::to_string);
        }
    }
}

/// A channel member.
///
/// Users compare equal by name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub rank: f64,
    #[serde(default)]
    pub profile: UserProfile,
    #[serde(default)]
    pub meta: UserMeta,
}

impl User {
    pub fn new(name: impl Into<String>, rank: f64) -> Self {
        Self {
            name: name.into(),
            rank,
            profile: UserProfile::default(),
            meta: UserMeta::default(),
        }
    }

    /// The not-yet-logged-in user.
    pub fn anonymous() -> Self {
        Self::new("", RANK_ANONYMOUS)
    }

    /// Parses a user object from `userlist`/`addUser` payloads.
    ///
    /// Returns `None` when the payload has no name.
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("name")?.as_str()?;
        let mut user = Self::new(name, value.get("rank").and_then(Value::as_f64).unwrap_or(0.0));
        if let Some(profile) = value.get("profile") {
            user.profile = serde_json::from_value(profile.clone()).unwrap_or_default();
        }
        if let Some(meta) = value.get("meta") {
            user.meta.update(meta);
        }
        Some(user)
    }

    pub fn afk(&self) -> bool {
        self.meta.afk
    }

    pub fn muted(&self) -> bool {
        self.meta.muted || self.meta.smuted
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl PartialEq<str> for User {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<user \"{}\" rank={}>", self.name, self.rank)
    }
}

/// Users present in the channel, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct UserList {
    users: BTreeMap<String, User>,
    leader: Option<String>,
    /// Connected sockets as reported by `usercount`, including anonymous viewers.
    pub count: u64,
    /// Highest `count` seen since the list was created.
    pub max_count: u64,
}

impl UserList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, user: User) -> Result<(), UserListError> {
        if self.users.contains_key(&user.name) {
            return Err(UserListError::Duplicate(user.name));
        }
        self.users.insert(user.name.clone(), user);
        Ok(())
    }

    /// Inserts or replaces a user.
    pub fn upsert(&mut self, user: User) {
        self.users.insert(user.name.clone(), user);
    }

    pub fn remove(&mut self, name: &str) -> Result<User, UserListError> {
        let user = self
            .users
            .remove(name)
            .ok_or_else(|| UserListError::NotFound(name.to_string()))?;
        if self.leader.as_deref() == Some(name) {
            self.leader = None;
        }
        Ok(user)
    }

    pub fn get(&self, name: &str) -> Result<&User, UserListError> {
        self.users
            .get(name)
            .ok_or_else(|| UserListError::NotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut User, UserListError> {
        self.users
            .get_mut(name)
            .ok_or_else(|| UserListError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn clear(&mut self) {
        self.users.clear();
        self.leader = None;
    }

    pub fn leader(&self) -> Option<&User> {
        self.leader.as_deref().and_then(|name| self.users.get(name))
    }

    /// Sets the leader by name. An empty name clears it.
    pub fn set_leader(&mut self, name: Option<&str>) -> Result<(), UserListError> {
        match name.filter(|n| !n.is_empty()) {
            None => {
                self.leader = None;
                Ok(())
            }
            Some(name) if self.users.contains_key(name) => {
                self.leader = Some(name.to_string());
                Ok(())
            }
            Some(name) => Err(UserListError::NotFound(name.to_string())),
        }
    }

    /// Records a `usercount` sample and returns the high-water mark.
    pub fn record_count(&mut self, count: u64) -> u64 {
        self.count = count;
        self.max_count = self.max_count.max(count);
        self.max_count
    }
}
