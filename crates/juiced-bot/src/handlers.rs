//! Built-in handlers that keep [`RoomState`] in sync with the server.
//!
//! They are registered before any user handler. Inconsistent updates (an
//! unknown user, a missing playlist item) are logged and skipped; only
//! `kick` fails the dispatch.

use juiced_core::{Playlist, PlaylistItem, Position, User};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dispatch::{Handler, Propagation, Registry};
use crate::error::BotError;
use crate::state::{Room, RoomState};
use crate::store::StoreHandle;

fn on_room<F>(registry: &Registry, event: &'static str, room: &RoomState, update: F)
where
    F: Fn(&mut Room, &Value) + Send + Sync + 'static,
{
    let room = room.clone();
    registry.on(
        event,
        Handler::immediate(move |_, data| {
            update(&mut room.write(), data);
            Ok(Propagation::Continue)
        }),
    );
}

fn name_of(data: &Value) -> Option<&str> {
    data.get("name").and_then(Value::as_str)
}

fn uid_of(data: &Value) -> Option<u64> {
    data.as_u64()
        .or_else(|| data.get("uid").and_then(Value::as_u64))
}

/// Applies a change to a listed user, warning if the user is unknown.
fn with_user(room: &mut Room, event: &str, data: &Value, update: impl FnOnce(&mut User)) {
    let Some(name) = name_of(data) else {
        warn!(event, "Missing user name");
        return;
    };
    match room.channel.userlist.get_mut(name) {
        Ok(user) => update(user),
        Err(e) => warn!(event, error = %e, "Ignoring update"),
    }
}

fn with_item(playlist: &mut Playlist, event: &str, uid: Option<u64>, update: impl FnOnce(&mut PlaylistItem)) {
    let Some(uid) = uid else {
        warn!(event, "Missing playlist uid");
        return;
    };
    match playlist.get_mut(uid) {
        Ok(item) => update(item),
        Err(e) => warn!(event, error = %e, "Ignoring update"),
    }
}

/// Registers every built-in handler.
pub(crate) fn register(registry: &Registry, room: &RoomState, store: Option<&StoreHandle>) {
    register_session(registry, room);
    register_users(registry, room, store);
    register_playlist(registry, room);
    registry.on(
        "kick",
        Handler::immediate(|_, data| {
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            Err(BotError::Kicked(reason.to_string()))
        }),
    );
}

fn register_session(registry: &Registry, room: &RoomState) {
    on_room(registry, "login", room, |room, data| {
        if data.get("success").and_then(Value::as_bool) != Some(true) {
            return;
        }
        if let Some(name) = name_of(data) {
            info!(name, "Logged in");
            room.user.name = name.to_string();
        }
    });
    on_room(registry, "rank", room, |room, data| match data.as_f64() {
        Some(rank) => room.user.rank = rank,
        None => warn!(?data, "Invalid rank"),
    });
    on_room(registry, "setPermissions", room, |room, data| {
        room.channel.set_permissions(data);
        debug!(count = room.channel.permissions.len(), "Permissions updated");
    });
    on_room(registry, "channelOpts", room, |room, data| match data.as_object() {
        Some(options) => room.channel.options = options.clone(),
        None => warn!(?data, "Invalid channel options"),
    });
    on_room(registry, "setMotd", room, |room, data| {
        let motd = data
            .as_str()
            .or_else(|| data.get("motd").and_then(Value::as_str));
        room.channel.motd = motd.unwrap_or_default().to_string();
    });
    on_room(registry, "setPlaylistLocked", room, |room, data| {
        room.channel.playlist.locked = data.as_bool().unwrap_or(false);
    });
}

fn register_users(registry: &Registry, room: &RoomState, store: Option<&StoreHandle>) {
    on_room(registry, "userlist", room, |room, data| {
        let userlist = &mut room.channel.userlist;
        userlist.clear();
        for user in data.as_array().into_iter().flatten().filter_map(User::from_value) {
            userlist.upsert(user);
        }
    });
    on_room(registry, "setUserMeta", room, |room, data| {
        let meta = data.get("meta").cloned().unwrap_or_default();
        with_user(room, "setUserMeta", data, |user| user.meta.update(&meta));
    });
    on_room(registry, "setUserRank", room, |room, data| {
        let Some(rank) = data.get("rank").and_then(Value::as_f64) else {
            warn!(?data, "Invalid rank update");
            return;
        };
        with_user(room, "setUserRank", data, |user| user.rank = rank);
    });
    on_room(registry, "setUserProfile", room, |room, data| {
        let profile = data
            .get("profile")
            .cloned()
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        with_user(room, "setUserProfile", data, |user| user.profile = profile);
    });
    on_room(registry, "setAFK", room, |room, data| {
        let afk = data.get("afk").and_then(Value::as_bool).unwrap_or(false);
        with_user(room, "setAFK", data, |user| user.meta.afk = afk);
    });
    on_room(registry, "setLeader", room, |room, data| {
        let name = data.as_str().or_else(|| name_of(data));
        if let Err(e) = room.channel.userlist.set_leader(name) {
            warn!(error = %e, "Ignoring leader change");
        }
    });

    let presence = |event: &'static str| {
        let room = room.clone();
        let store = store.cloned();
        Handler::suspending(move |_, data| {
            let room = room.clone();
            let store = store.clone();
            async move {
                let Some(name) = update_presence(&room, event, &data) else {
                    return Ok(Propagation::Continue);
                };
                if let Some(store) = store {
                    let joined = event == "addUser";
                    let result = store
                        .call(move |s| if joined { s.user_joined(&name) } else { s.user_left(&name) })
                        .await;
                    if let Err(e) = result {
                        warn!(event, error = %e, "Failed to record presence");
                    }
                }
                Ok(Propagation::Continue)
            }
        })
    };
    registry.on("addUser", presence("addUser"));
    registry.on("userLeave", presence("userLeave"));

    let room = room.clone();
    let store = store.cloned();
    registry.on(
        "usercount",
        Handler::suspending(move |_, data| {
            let room = room.clone();
            let store = store.clone();
            async move {
                let Some(count) = data.as_u64() else {
                    warn!(?data, "Invalid user count");
                    return Ok(Propagation::Continue);
                };
                let chat_users = {
                    let mut room = room.write();
                    room.channel.userlist.record_count(count);
                    room.channel.userlist.len() as u64
                };
                if let Some(store) = store
                    && let Err(e) = store
                        .call(move |s| s.update_high_water_mark(chat_users, count))
                        .await
                {
                    warn!(error = %e, "Failed to update high water mark");
                }
                Ok(Propagation::Continue)
            }
        }),
    );
}

/// Applies `addUser`/`userLeave` and returns the affected name.
fn update_presence(room: &RoomState, event: &str, data: &Value) -> Option<String> {
    let mut room = room.write();
    let userlist = &mut room.channel.userlist;
    if event == "addUser" {
        let Some(user) = User::from_value(data) else {
            warn!(?data, "Invalid user");
            return None;
        };
        let name = user.name.clone();
        userlist.upsert(user);
        return Some(name);
    }
    let name = name_of(data)?.to_string();
    if let Err(e) = userlist.remove(&name) {
        warn!(error = %e, "Ignoring userLeave");
    }
    Some(name)
}

fn register_playlist(registry: &Registry, room: &RoomState) {
    on_room(registry, "playlist", room, |room, data| {
        let playlist = &mut room.channel.playlist;
        playlist.clear();
        for raw in data.as_array().into_iter().flatten() {
            match PlaylistItem::from_value(raw) {
                Ok(item) => {
                    if let Err(e) = playlist.add(Position::Append, item) {
                        warn!(error = %e, "Ignoring playlist item");
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring playlist item"),
            }
        }
    });
    on_room(registry, "queue", room, |room, data| {
        let item = match data.get("item").map(PlaylistItem::from_value) {
            Some(Ok(item)) => item,
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring queued item");
                return;
            }
            None => {
                warn!(?data, "Queue event without item");
                return;
            }
        };
        let position = Position::from_value(data.get("after"));
        if let Err(e) = room.channel.playlist.add(position, item) {
            warn!(error = %e, "Ignoring queued item");
        }
    });
    on_room(registry, "delete", room, |room, data| {
        let Some(uid) = uid_of(data) else {
            warn!(?data, "Delete without uid");
            return;
        };
        if let Err(e) = room.channel.playlist.remove(uid) {
            warn!(error = %e, "Ignoring delete");
        }
    });
    on_room(registry, "moveVideo", room, |room, data| {
        let Some(from) = data.get("from").and_then(Value::as_u64) else {
            warn!(?data, "Move without source uid");
            return;
        };
        let position = Position::from_value(data.get("after"));
        if let Err(e) = room.channel.playlist.move_item(from, position) {
            warn!(error = %e, "Ignoring move");
        }
    });
    on_room(registry, "setCurrent", room, |room, data| {
        if let Err(e) = room.channel.playlist.set_current(uid_of(data)) {
            warn!(error = %e, "Ignoring setCurrent");
        }
    });
    on_room(registry, "changeMedia", room, |room, data| {
        let playlist = &mut room.channel.playlist;
        playlist.current_time = data.get("currentTime").and_then(Value::as_f64).unwrap_or(0.0);
        playlist.paused = data.get("paused").and_then(Value::as_bool).unwrap_or(false);
    });
    on_room(registry, "mediaUpdate", room, |room, data| {
        let playlist = &mut room.channel.playlist;
        if let Some(time) = data.get("currentTime").and_then(Value::as_f64) {
            playlist.current_time = time;
        }
        if let Some(paused) = data.get("paused").and_then(Value::as_bool) {
            playlist.paused = paused;
        }
    });
    on_room(registry, "setTemp", room, |room, data| {
        let temp = data.get("temp").and_then(Value::as_bool).unwrap_or(false);
        with_item(&mut room.channel.playlist, "setTemp", uid_of(data), |item| item.temp = temp);
    });
    on_room(registry, "setPlaylistMeta", room, |room, data| {
        if let Some(time) = data.get("rawTime").and_then(Value::as_f64) {
            room.channel.playlist.time = time;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::FailingStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup(store: Option<&StoreHandle>) -> (Registry, RoomState) {
        let registry = Registry::new();
        let room = RoomState::new("lobby");
        register(&registry, &room, store);
        (registry, room)
    }

    fn item(uid: u64) -> Value {
        json!({"uid": uid, "temp": true, "queueby": "alice",
               "media": {"type": "yt", "id": format!("v{uid}"), "title": format!("t{uid}"), "seconds": 60}})
    }

    fn uids(room: &RoomState) -> Vec<u64> {
        room.read().channel.playlist.queue.iter().map(|i| i.uid).collect()
    }

    #[tokio::test]
    async fn session_events_update_identity_and_channel() {
        let (registry, room) = setup(None);
        registry.trigger("login", &json!({"success": true, "name": "bot"})).await.unwrap();
        registry.trigger("rank", &json!(3)).await.unwrap();
        registry.trigger("setPermissions", &json!({"chat": 0, "kick": 2})).await.unwrap();
        registry.trigger("channelOpts", &json!({"allow_voteskip": true})).await.unwrap();
        registry.trigger("setMotd", &json!("welcome")).await.unwrap();
        registry.trigger("setPlaylistLocked", &json!(true)).await.unwrap();

        let room = room.read();
        assert_eq!(room.user.name, "bot");
        assert_eq!(room.user.rank, 3.0);
        assert_eq!(room.channel.permissions.get("kick"), Some(&2.0));
        assert_eq!(room.channel.options.get("allow_voteskip"), Some(&json!(true)));
        assert_eq!(room.channel.motd, "welcome");
        assert!(room.channel.playlist.locked);
    }

    #[tokio::test]
    async fn failed_login_keeps_identity() {
        let (registry, room) = setup(None);
        registry
            .trigger("login", &json!({"success": false, "error": "bad password"}))
            .await
            .unwrap();
        assert_eq!(room.read().user.name, "");
    }

    #[tokio::test]
    async fn user_events_update_userlist_and_store() {
        let memory = Arc::new(MemoryStore::new());
        let store = StoreHandle::from_arc(memory.clone());
        let (registry, room) = setup(Some(&store));

        registry
            .trigger("userlist", &json!([{"name": "alice", "rank": 1}, {"name": "bob", "rank": 2}]))
            .await
            .unwrap();
        registry.trigger("addUser", &json!({"name": "carol", "rank": 0})).await.unwrap();
        registry.trigger("userLeave", &json!({"name": "bob"})).await.unwrap();
        registry.trigger("usercount", &json!(42)).await.unwrap();

        {
            let room = room.read();
            let userlist = &room.channel.userlist;
            assert!(userlist.contains("alice"));
            assert!(userlist.contains("carol"));
            assert!(!userlist.contains("bob"));
            assert_eq!(userlist.count, 42);
        }
        assert_eq!(memory.joins("carol"), 1);
        assert_eq!(memory.high_water_mark(), (2, 42));
    }

    #[tokio::test]
    async fn store_failures_do_not_stop_user_events() {
        let store = StoreHandle::new(FailingStore);
        let (registry, room) = setup(Some(&store));

        registry.trigger("userlist", &json!([{"name": "alice", "rank": 1}])).await.unwrap();
        let joined = registry.trigger("addUser", &json!({"name": "carol", "rank": 0})).await;
        let left = registry.trigger("userLeave", &json!({"name": "alice"})).await;
        let count = registry.trigger("usercount", &json!(7)).await;

        assert!(matches!(joined, Ok(Propagation::Continue)));
        assert!(matches!(left, Ok(Propagation::Continue)));
        assert!(matches!(count, Ok(Propagation::Continue)));
        let room = room.read();
        let userlist = &room.channel.userlist;
        assert!(userlist.contains("carol"));
        assert!(!userlist.contains("alice"));
        assert_eq!(userlist.count, 7);
    }

    #[tokio::test]
    async fn user_updates_apply_to_listed_users() {
        let (registry, room) = setup(None);
        registry.trigger("userlist", &json!([{"name": "dave", "rank": 1}])).await.unwrap();
        registry
            .trigger("setUserMeta", &json!({"name": "dave", "meta": {"muted": true, "aliases": ["x"]}}))
            .await
            .unwrap();
        registry.trigger("setUserRank", &json!({"name": "dave", "rank": 3})).await.unwrap();
        registry.trigger("setAFK", &json!({"name": "dave", "afk": true})).await.unwrap();
        registry
            .trigger("setUserProfile", &json!({"name": "dave", "profile": {"image": "i", "text": "hi"}}))
            .await
            .unwrap();
        registry.trigger("setLeader", &json!("dave")).await.unwrap();

        let room = room.read();
        let dave = room.channel.userlist.get("dave").unwrap();
        assert!(dave.muted());
        assert_eq!(dave.meta.aliases, vec!["x"]);
        assert_eq!(dave.rank, 3.0);
        assert!(dave.afk());
        assert_eq!(dave.profile.text, "hi");
        assert_eq!(room.channel.userlist.leader().map(|u| u.name.as_str()), Some("dave"));
    }

    #[tokio::test]
    async fn unknown_users_are_ignored() {
        let (registry, room) = setup(None);
        registry.trigger("setUserRank", &json!({"name": "ghost", "rank": 3})).await.unwrap();
        registry.trigger("userLeave", &json!({"name": "ghost"})).await.unwrap();
        registry.trigger("setLeader", &json!("ghost")).await.unwrap();
        assert!(room.read().channel.userlist.is_empty());
    }

    #[tokio::test]
    async fn playlist_events_update_queue() {
        let (registry, room) = setup(None);
        registry.trigger("playlist", &json!([item(1), item(2)])).await.unwrap();
        registry.trigger("queue", &json!({"item": item(3), "after": 1})).await.unwrap();
        assert_eq!(uids(&room), vec![1, 3, 2]);

        registry.trigger("moveVideo", &json!({"from": 2, "after": "prepend"})).await.unwrap();
        assert_eq!(uids(&room), vec![2, 1, 3]);

        registry.trigger("delete", &json!({"uid": 1})).await.unwrap();
        registry.trigger("setCurrent", &json!(3)).await.unwrap();
        registry
            .trigger("changeMedia", &json!({"currentTime": 12.5, "paused": true}))
            .await
            .unwrap();
        registry.trigger("mediaUpdate", &json!({"currentTime": 20.0, "paused": false})).await.unwrap();
        registry.trigger("setTemp", &json!({"uid": 3, "temp": false})).await.unwrap();
        registry.trigger("setPlaylistMeta", &json!({"count": 2, "rawTime": 120.0})).await.unwrap();

        let room = room.read();
        let playlist = &room.channel.playlist;
        assert_eq!(playlist.queue.iter().map(|i| i.uid).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(playlist.current_uid(), Some(3));
        assert_eq!(playlist.current_time, 20.0);
        assert!(!playlist.paused);
        assert!(!playlist.get(3).unwrap().temp);
        assert_eq!(playlist.time, 120.0);
    }

    #[tokio::test]
    async fn bad_playlist_updates_are_ignored() {
        let (registry, room) = setup(None);
        registry.trigger("playlist", &json!([item(1)])).await.unwrap();
        registry.trigger("queue", &json!({"item": item(2), "after": 99})).await.unwrap();
        registry.trigger("queue", &json!({"item": {"uid": 5}})).await.unwrap();
        registry.trigger("delete", &json!({"uid": 99})).await.unwrap();
        registry.trigger("moveVideo", &json!({"from": 1, "after": 99})).await.unwrap();
        registry.trigger("setCurrent", &json!(99)).await.unwrap();
        assert_eq!(uids(&room), vec![1]);
    }

    #[tokio::test]
    async fn kick_fails_dispatch() {
        let (registry, _room) = setup(None);
        let err = registry
            .trigger("kick", &json!({"reason": "spam"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Kicked(reason) if reason == "spam"));
    }
}
