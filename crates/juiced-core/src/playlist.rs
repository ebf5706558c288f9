//! Playlist mirror.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlaylistError;
use crate::media_link::MediaLink;

/// Where an item lands when it is queued or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Prepend,
    Append,
    After(u64),
}

impl Position {
    /// Reads the `after` field used by `queue` and `moveVideo`.
    ///
    /// Numbers are uids, `"prepend"` puts the item first, anything else appends.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n.as_u64().map_or(Self::Append, Self::After),
            Some(Value::String(s)) if s == "prepend" => Self::Prepend,
            Some(Value::String(s)) => s.parse().map_or(Self::Append, Self::After),
            _ => Self::Append,
        }
    }
}

/// A queued media item.
///
/// Items compare equal by uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub uid: u64,
    pub temp: bool,
    /// Name of the user who queued the item.
    pub queueby: String,
    pub link: MediaLink,
    pub title: String,
    /// Duration in seconds.
    pub duration: f64,
}

#[derive(Deserialize)]
struct RawItem {
    uid: u64,
    #[serde(default)]
    temp: bool,
    #[serde(default)]
    queueby: String,
    media: RawMedia,
}

#[derive(Deserialize)]
struct RawMedia {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    seconds: f64,
}

impl PlaylistItem {
    /// Parses an item as the server sends it:
    /// `{uid, temp, queueby, media: {type, id, title, seconds}}`.
    pub fn from_value(value: &Value) -> Result<Self, PlaylistError> {
        let raw: RawItem = serde_json::from_value(value.clone())
            .map_err(|e| PlaylistError::InvalidItem(e.to_string()))?;
        Ok(Self {
            uid: raw.uid,
            temp: raw.temp,
            queueby: raw.queueby,
            link: MediaLink::new(raw.media.kind, raw.media.id),
            title: raw.media.title,
            duration: raw.media.seconds,
        })
    }
}

impl PartialEq for PlaylistItem {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl fmt::Display for PlaylistItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<playlist item #{} \"{}\" {}>",
            self.uid, self.title, self.link
        )
    }
}

/// The channel's queue and playback position.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    pub queue: Vec<PlaylistItem>,
    current: Option<u64>,
    /// When false, users with "open playlist" permissions may edit the queue.
    pub locked: bool,
    pub paused: bool,
    /// Playback position of the current item, in seconds.
    pub current_time: f64,
    /// Total queue duration in seconds, as reported by `setPlaylistMeta`.
    pub time: f64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn index(&self, uid: u64) -> Result<usize, PlaylistError> {
        self.queue
            .iter()
            .position(|item| item.uid == uid)
            .ok_or(PlaylistError::NotFound(uid))
    }

    pub fn get(&self, uid: u64) -> Result<&PlaylistItem, PlaylistError> {
        self.index(uid).map(|i| &self.queue[i])
    }

    pub fn get_mut(&mut self, uid: u64) -> Result<&mut PlaylistItem, PlaylistError> {
        let i = self.index(uid)?;
        Ok(&mut self.queue[i])
    }

    /// Inserts an item. An unknown `After` anchor is an error and leaves the
    /// queue unchanged.
    pub fn add(&mut self, position: Position, item: PlaylistItem) -> Result<(), PlaylistError> {
        match position {
            Position::Prepend => self.queue.insert(0, item),
            Position::Append => self.queue.push(item),
            Position::After(uid) => {
                let i = self.index(uid)?;
                self.queue.insert(i + 1, item);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, uid: u64) -> Result<PlaylistItem, PlaylistError> {
        let i = self.index(uid)?;
        if self.current == Some(uid) {
            self.current = None;
        }
        Ok(self.queue.remove(i))
    }

    /// Moves an item. If the anchor is missing the item is put back where it was.
    pub fn move_item(&mut self, uid: u64, position: Position) -> Result<(), PlaylistError> {
        if position == Position::After(uid) {
            return Ok(());
        }
        let from = self.index(uid)?;
        let item = self.queue.remove(from);
        let backup = item.clone();
        if let Err(e) = self.add(position, item) {
            self.queue.insert(from, backup);
            return Err(e);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.current
            .and_then(|uid| self.queue.iter().find(|item| item.uid == uid))
    }

    pub fn current_uid(&self) -> Option<u64> {
        self.current
    }

    /// Selects the current item. `None` clears it.
    pub fn set_current(&mut self, uid: Option<u64>) -> Result<(), PlaylistError> {
        if let Some(uid) = uid {
            self.index(uid)?;
        }
        self.current = uid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(uid: u64) -> PlaylistItem {
        PlaylistItem::from_value(&json!({
            "uid": uid,
            "temp": false,
            "queueby": "u",
            "media": {"type": "yt", "id": format!("id{uid}"), "title": "t", "seconds": 10}
        }))
        .unwrap()
    }

    fn uids(playlist: &Playlist) -> Vec<u64> {
        playlist.queue.iter().map(|i| i.uid).collect()
    }

    #[test]
    fn parses_item() {
        let it = item(1);
        assert_eq!(it.link, MediaLink::new("yt", "id1"));
        assert_eq!(it.duration, 10.0);
        assert!(it.to_string().starts_with("<playlist item #1"));
        assert_eq!(it, item(1));
        assert!(PlaylistItem::from_value(&json!({"uid": 1})).is_err());
    }

    #[test]
    fn position_from_value() {
        assert_eq!(Position::from_value(None), Position::Append);
        assert_eq!(Position::from_value(Some(&json!(4))), Position::After(4));
        assert_eq!(Position::from_value(Some(&json!("7"))), Position::After(7));
        assert_eq!(
            Position::from_value(Some(&json!("prepend"))),
            Position::Prepend
        );
        assert_eq!(Position::from_value(Some(&json!("append"))), Position::Append);
    }

    #[test]
    fn add_get_remove_move_clear() {
        let mut pl = Playlist::new();
        pl.add(Position::Append, item(1)).unwrap();
        pl.add(Position::Append, item(2)).unwrap();
        pl.add(Position::Prepend, item(3)).unwrap();
        pl.add(Position::After(3), item(4)).unwrap();
        assert_eq!(uids(&pl), vec![3, 4, 1, 2]);
        assert_eq!(pl.add(Position::After(99), item(5)), Err(PlaylistError::NotFound(99)));

        pl.set_current(Some(1)).unwrap();
        assert_eq!(pl.current().map(|i| i.uid), Some(1));

        pl.move_item(1, Position::After(2)).unwrap();
        assert_eq!(uids(&pl), vec![3, 4, 2, 1]);
        pl.move_item(2, Position::Prepend).unwrap();
        assert_eq!(uids(&pl), vec![2, 3, 4, 1]);

        pl.remove(1).unwrap();
        assert!(pl.current().is_none());
        assert_eq!(pl.len(), 3);

        pl.clear();
        assert!(pl.is_empty());
    }

    #[test]
    fn move_to_missing_anchor_restores_order() {
        let mut pl = Playlist::new();
        pl.add(Position::Append, item(1)).unwrap();
        pl.add(Position::Append, item(2)).unwrap();
        assert!(pl.move_item(1, Position::After(42)).is_err());
        assert_eq!(uids(&pl), vec![1, 2]);
    }

    #[test]
    fn set_current_rejects_unknown_uid() {
        let mut pl = Playlist::new();
        assert_eq!(pl.set_current(Some(5)), Err(PlaylistError::NotFound(5)));
        pl.set_current(None).unwrap();
    }
}
