//! Remote actions.
//!
//! Every action checks the acting user's permissions against the room state,
//! sends its event, then waits for the server's acknowledgment. No
//! acknowledgment within `response_timeout`, or a failure acknowledgment,
//! is a [`BotError::Channel`]. A successful acknowledgment is consumed by
//! the connection, so it is dispatched through the registry here to keep
//! the room state current.

use juiced_core::{MediaLink, PermissionError, User};
use serde_json::{Value, json};
use tracing::debug;

use crate::bot::Bot;
use crate::error::{BotError, BotResult};
use crate::socket_io::ResponseMatcher;
use crate::state::Room;

impl Bot {
    async fn request(
        &self,
        action: &str,
        event: &str,
        data: Value,
        success: ResponseMatcher,
        failures: &[&str],
    ) -> BotResult<Value> {
        let socket = self.live_socket()?;
        let matcher = if failures.is_empty() {
            success.clone()
        } else {
            success.clone().or(ResponseMatcher::events(failures.iter().copied()))
        };
        let reply = socket
            .emit(event, data, Some(matcher), Some(self.config().response_timeout))
            .await?;
        let Some((ack, payload)) = reply else {
            return Err(BotError::channel(format!("{action}: no response from server")));
        };
        self.trigger(&ack, &payload).await?;
        if success.matches(&ack, &payload) {
            debug!(action, ack = %ack, "Action acknowledged");
            return Ok(payload);
        }
        let reason = payload
            .get("msg")
            .and_then(Value::as_str)
            .map_or_else(|| payload.to_string(), str::to_string);
        Err(BotError::channel(format!("{action}: {ack}: {reason}")))
    }

    /// Reads the room under the lock, releasing it before any await.
    fn inspect<T>(&self, f: impl FnOnce(&Room, User) -> BotResult<T>) -> BotResult<T> {
        let room = self.room().read();
        let me = room.me();
        f(&room, me)
    }

    fn check_playlist(&self, action: &str) -> BotResult<()> {
        self.inspect(|room, me| {
            let action = room.channel.playlist_action(action);
            Ok(room.channel.check_permission(&action, &me)?)
        })
    }

    /// Sends a chat message.
    pub async fn chat(&self, msg: &str) -> BotResult<Value> {
        let name = self.inspect(|room, me| {
            room.channel.check_permission("chat", &me)?;
            if me.muted() {
                return Err(PermissionError::refused("muted").into());
            }
            Ok(me.name)
        })?;
        self.request(
            "chat",
            "chatMsg",
            json!({ "msg": msg, "meta": {} }),
            ResponseMatcher::event("chatMsg").with_field("username", name),
            &["noflood", "spamFiltered"],
        )
        .await
    }

    /// Sends a private message.
    pub async fn pm(&self, to: &str, msg: &str) -> BotResult<Value> {
        let name = self.inspect(|room, me| {
            room.channel.check_permission("chat", &me)?;
            Ok(me.name)
        })?;
        self.request(
            "pm",
            "pm",
            json!({ "to": to, "msg": msg, "meta": {} }),
            ResponseMatcher::event("pm").with_field("username", name),
            &["errorMsg"],
        )
        .await
    }

    /// Queues a media link at the end of the playlist (`append`) or after
    /// the current item.
    pub async fn add_media(&self, link: &MediaLink, append: bool, temp: bool) -> BotResult<Value> {
        self.check_playlist("playlistadd")?;
        let id = link.id.clone();
        let kind = link.kind.clone();
        let queued = ResponseMatcher::new(move |event, data| {
            event == "queue"
                && data["item"]["media"]["id"] == id.as_str()
                && data["item"]["media"]["type"] == kind.as_str()
        });
        self.request(
            "add_media",
            "queue",
            json!({
                "id": link.id,
                "type": link.kind,
                "pos": if append { "end" } else { "next" },
                "temp": temp,
            }),
            queued,
            &["queueFail"],
        )
        .await
    }

    /// Parses a URL and queues it.
    pub async fn add_media_url(&self, url: &str, append: bool, temp: bool) -> BotResult<Value> {
        let link = MediaLink::from_url(url)?;
        self.add_media(&link, append, temp).await
    }

    pub async fn remove_media(&self, uid: u64) -> BotResult<Value> {
        self.check_playlist("playlistdelete")?;
        self.request(
            "remove_media",
            "delete",
            json!(uid),
            ResponseMatcher::event("delete").with_field("uid", uid),
            &[],
        )
        .await
    }

    /// Moves an item after another one. Moving to the front is not supported.
    pub async fn move_media(&self, uid: u64, after: Option<u64>) -> BotResult<Value> {
        let Some(after) = after else {
            return Err(BotError::Unsupported("moving a playlist item to the front".into()));
        };
        self.check_playlist("playlistmove")?;
        self.request(
            "move_media",
            "moveMedia",
            json!({ "from": uid, "after": after }),
            ResponseMatcher::event("moveVideo").with_field("from", uid),
            &[],
        )
        .await
    }

    pub async fn set_current_media(&self, uid: u64) -> BotResult<Value> {
        self.check_playlist("playlistjump")?;
        self.request(
            "set_current_media",
            "jumpTo",
            json!(uid),
            ResponseMatcher::new(move |event, data| event == "setCurrent" && *data == uid),
            &[],
        )
        .await
    }

    /// Gives the leader role to `name`, or takes it away with `None`.
    pub async fn set_leader(&self, name: Option<&str>) -> BotResult<Value> {
        self.inspect(|room, me| Ok(room.channel.check_permission("leaderctl", &me)?))?;
        self.request(
            "set_leader",
            "assignLeader",
            json!({ "name": name.unwrap_or_default() }),
            ResponseMatcher::event("setLeader"),
            &[],
        )
        .await
    }

    pub async fn pause(&self) -> BotResult<Value> {
        self.set_paused(true).await
    }

    pub async fn play(&self) -> BotResult<Value> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> BotResult<Value> {
        let update = self.inspect(|room, _| {
            if !room.is_leader() {
                return Err(PermissionError::refused("only the leader can control playback").into());
            }
            let playlist = &room.channel.playlist;
            Ok(playlist.current().map(|item| {
                json!({
                    "id": item.link.id,
                    "currentTime": playlist.current_time,
                    "paused": paused,
                    "type": item.link.kind,
                })
            }))
        })?;
        let Some(update) = update else {
            debug!(paused, "Nothing is playing");
            return Ok(Value::Null);
        };
        self.request(
            if paused { "pause" } else { "play" },
            "mediaUpdate",
            update,
            ResponseMatcher::event("mediaUpdate").with_field("paused", paused),
            &[],
        )
        .await
    }

    /// Kicks a user. Requires the `kick` permission and a higher rank than
    /// the target.
    pub async fn kick(&self, name: &str, reason: &str) -> BotResult<Value> {
        self.inspect(|room, me| {
            room.channel.check_permission("kick", &me)?;
            let target = room
                .channel
                .userlist
                .get(name)
                .map_err(|e| BotError::channel(format!("kick: {e}")))?;
            if me.rank <= target.rank {
                return Err(PermissionError::refused(format!(
                    "cannot kick {name}: rank {} is not above {}",
                    me.rank, target.rank
                ))
                .into());
            }
            Ok(())
        })?;
        let command = format!("/kick {name} {reason}");
        self.request(
            "kick",
            "chatMsg",
            json!({ "msg": command.trim_end(), "meta": {} }),
            ResponseMatcher::event("userLeave").with_field("name", name),
            &["errorMsg"],
        )
        .await
    }

    /// Changes a user's channel rank. The acting user must outrank both the
    /// target's current rank and the new one.
    pub async fn set_rank(&self, name: &str, rank: f64) -> BotResult<Value> {
        self.inspect(|room, me| {
            let current = room.channel.userlist.get(name).map_or(0.0, |u| u.rank);
            if me.rank <= current || me.rank <= rank {
                return Err(PermissionError::refused(format!(
                    "cannot set rank of {name} to {rank}: own rank {} is too low",
                    me.rank
                ))
                .into());
            }
            Ok(())
        })?;
        self.request(
            "set_rank",
            "setChannelRank",
            json!({ "name": name, "rank": rank }),
            ResponseMatcher::event("setUserRank").with_field("name", name),
            &["errorMsg"],
        )
        .await
    }

    /// Sets or clears the acting user's AFK flag. Does nothing if it already
    /// has the requested value.
    pub async fn set_afk(&self, afk: bool) -> BotResult<Value> {
        let me = self.inspect(|_, me| Ok(me))?;
        if me.afk() == afk {
            return Ok(Value::Null);
        }
        self.request(
            "set_afk",
            "chatMsg",
            json!({ "msg": "/afk", "meta": {} }),
            ResponseMatcher::event("setAFK").with_field("name", me.name),
            &[],
        )
        .await
    }
}
