//! Persistence backend.
//!
//! [`Store`] is synchronous. Async code goes through [`StoreHandle`], which
//! runs each call on the blocking pool so a slow database never stalls the
//! event loop.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::state::Room;

/// An unsent message waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: i64,
    pub message: String,
    pub retry_count: u32,
}

/// Periodic summary of the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub channel: String,
    pub users: Vec<String>,
    pub connected: u64,
    pub leader: Option<String>,
    pub current_media: Option<String>,
    pub queue_length: usize,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn from_room(room: &Room) -> Self {
        let channel = &room.channel;
        Self {
            channel: channel.name.clone(),
            users: channel.userlist.iter().map(|u| u.name.clone()).collect(),
            connected: channel.userlist.count,
            leader: channel.userlist.leader().map(|u| u.name.clone()),
            current_media: channel.playlist.current().map(|item| item.title.clone()),
            queue_length: channel.playlist.len(),
            timestamp: Utc::now(),
        }
    }
}

/// Storage used for durable outbound messages, presence and room history.
pub trait Store: Send + Sync {
    /// Unsent, not permanently failed messages with fewer than
    /// `max_retries` attempts, oldest first.
    fn get_unsent_outbound_messages(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboundMessage>, StoreError>;

    fn mark_outbound_sent(&self, id: i64) -> Result<(), StoreError>;

    /// Records a failed attempt. A permanent failure is never polled again.
    fn mark_outbound_failed(&self, id: i64, reason: &str, is_permanent: bool)
    -> Result<(), StoreError>;

    fn user_joined(&self, name: &str) -> Result<(), StoreError>;

    fn user_left(&self, name: &str) -> Result<(), StoreError>;

    /// Raises the stored maxima to at least the given counts.
    fn update_high_water_mark(&self, chat_users: u64, connected: u64) -> Result<(), StoreError>;

    /// Queues a message for delivery and returns its id.
    fn enqueue_outbound(&self, message: &str) -> Result<i64, StoreError>;

    fn save_status(&self, status: &StatusSnapshot) -> Result<(), StoreError>;

    fn log_user_counts(&self, chat_users: u64, connected: u64) -> Result<(), StoreError>;

    /// Deletes history and delivered messages older than `retention`.
    /// Returns the number of rows removed.
    fn prune(&self, retention: Duration) -> Result<usize, StoreError>;
}

fn cutoff(retention: Duration) -> Option<DateTime<Utc>> {
    let retention = TimeDelta::from_std(retention).ok()?;
    Utc::now().checked_sub_signed(retention)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn now_iso() -> String {
    timestamp(Utc::now())
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outbound_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    message     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    sent        INTEGER NOT NULL DEFAULT 0,
    sent_at     TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    failed      INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT
);
CREATE TABLE IF NOT EXISTS user_stats (
    username     TEXT PRIMARY KEY,
    joins        INTEGER NOT NULL DEFAULT 0,
    first_seen   TEXT NOT NULL,
    last_joined  TEXT,
    last_left    TEXT
);
CREATE TABLE IF NOT EXISTS high_water_mark (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    max_users     INTEGER NOT NULL,
    max_connected INTEGER NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_count_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    at         TEXT NOT NULL,
    chat_users INTEGER NOT NULL,
    connected  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS status (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    snapshot   TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outbound_pending ON outbound_messages (sent, failed, id);
CREATE INDEX IF NOT EXISTS idx_history_at ON user_count_history (at);
";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deletes history samples and delivered messages older than `before`.
    pub fn prune_before(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = timestamp(before);
        let conn = self.conn();
        let history = conn.execute("DELETE FROM user_count_history WHERE at < ?1", params![before])?;
        let sent = conn.execute(
            "DELETE FROM outbound_messages WHERE sent = 1 AND sent_at < ?1",
            params![before],
        )?;
        debug!(history, sent, "Pruned database");
        Ok(history + sent)
    }

    /// Stored `(max_users, max_connected)`, if any sample was recorded.
    pub fn high_water_mark(&self) -> Result<Option<(u64, u64)>, StoreError> {
        let mark = self
            .conn()
            .query_row(
                "SELECT max_users, max_connected FROM high_water_mark WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?;
        Ok(mark)
    }

    /// The last saved status snapshot.
    pub fn latest_status(&self) -> Result<Option<StatusSnapshot>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row("SELECT snapshot FROM status WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Join count for a user.
    pub fn joins(&self, name: &str) -> Result<u64, StoreError> {
        let joins: Option<i64> = self
            .conn()
            .query_row(
                "SELECT joins FROM user_stats WHERE username = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(joins.unwrap_or(0) as u64)
    }
}

impl Store for SqliteStore {
    fn get_unsent_outbound_messages(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboundMessage>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, message, retry_count FROM outbound_messages
             WHERE sent = 0 AND failed = 0 AND retry_count < ?1
             ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![max_retries, limit as i64], |row| {
                Ok(OutboundMessage {
                    id: row.get(0)?,
                    message: row.get(1)?,
                    retry_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn mark_outbound_sent(&self, id: i64) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE outbound_messages SET sent = 1, sent_at = ?1 WHERE id = ?2",
            params![now_iso(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn mark_outbound_failed(
        &self,
        id: i64,
        reason: &str,
        is_permanent: bool,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE outbound_messages
             SET retry_count = retry_count + 1, last_error = ?1, failed = ?2
             WHERE id = ?3",
            params![reason, is_permanent, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn user_joined(&self, name: &str) -> Result<(), StoreError> {
        let now = now_iso();
        self.conn().execute(
            "INSERT INTO user_stats (username, joins, first_seen, last_joined)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(username) DO UPDATE SET joins = joins + 1, last_joined = ?2",
            params![name, now],
        )?;
        Ok(())
    }

    fn user_left(&self, name: &str) -> Result<(), StoreError> {
        let now = now_iso();
        self.conn().execute(
            "INSERT INTO user_stats (username, joins, first_seen, last_left)
             VALUES (?1, 0, ?2, ?2)
             ON CONFLICT(username) DO UPDATE SET last_left = ?2",
            params![name, now],
        )?;
        Ok(())
    }

    fn update_high_water_mark(&self, chat_users: u64, connected: u64) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO high_water_mark (id, max_users, max_connected, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 max_users = MAX(max_users, ?1),
                 max_connected = MAX(max_connected, ?2),
                 updated_at = ?3",
            params![chat_users as i64, connected as i64, now_iso()],
        )?;
        Ok(())
    }

    fn enqueue_outbound(&self, message: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO outbound_messages (message, created_at) VALUES (?1, ?2)",
            params![message, now_iso()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn save_status(&self, status: &StatusSnapshot) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(status).map_err(|e| StoreError::Task(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO status (id, snapshot, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET snapshot = ?1, updated_at = ?2",
            params![snapshot, timestamp(status.timestamp)],
        )?;
        Ok(())
    }

    fn log_user_counts(&self, chat_users: u64, connected: u64) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO user_count_history (at, chat_users, connected) VALUES (?1, ?2, ?3)",
            params![now_iso(), chat_users as i64, connected as i64],
        )?;
        Ok(())
    }

    fn prune(&self, retention: Duration) -> Result<usize, StoreError> {
        match cutoff(retention) {
            Some(before) => self.prune_before(before),
            None => Ok(0),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryMessage {
    message: String,
    sent: bool,
    sent_at: Option<DateTime<Utc>>,
    retry_count: u32,
    failed: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    outbound: BTreeMap<i64, MemoryMessage>,
    joins: HashMap<String, u64>,
    present: Vec<String>,
    high_water: (u64, u64),
    history: Vec<(DateTime<Utc>, u64, u64)>,
    status: Option<StatusSnapshot>,
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `(sent, failed, retry_count, last_error)` of a message.
    pub fn outbound_state(&self, id: i64) -> Option<(bool, bool, u32, Option<String>)> {
        self.state()
            .outbound
            .get(&id)
            .map(|m| (m.sent, m.failed, m.retry_count, m.last_error.clone()))
    }

    pub fn high_water_mark(&self) -> (u64, u64) {
        self.state().high_water
    }

    /// Users currently recorded as present.
    pub fn present(&self) -> Vec<String> {
        self.state().present.clone()
    }

    pub fn joins(&self, name: &str) -> u64 {
        self.state().joins.get(name).copied().unwrap_or(0)
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    pub fn latest_status(&self) -> Option<StatusSnapshot> {
        self.state().status.clone()
    }
}

impl Store for MemoryStore {
    fn get_unsent_outbound_messages(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboundMessage>, StoreError> {
        Ok(self
            .state()
            .outbound
            .iter()
            .filter(|(_, m)| !m.sent && !m.failed && m.retry_count < max_retries)
            .take(limit)
            .map(|(id, m)| OutboundMessage {
                id: *id,
                message: m.message.clone(),
                retry_count: m.retry_count,
            })
            .collect())
    }

    fn mark_outbound_sent(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state();
        let message = state.outbound.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        message.sent = true;
        message.sent_at = Some(Utc::now());
        Ok(())
    }

    fn mark_outbound_failed(
        &self,
        id: i64,
        reason: &str,
        is_permanent: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let message = state.outbound.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        message.retry_count += 1;
        message.failed = is_permanent;
        message.last_error = Some(reason.to_string());
        Ok(())
    }

    fn user_joined(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        *state.joins.entry(name.to_string()).or_default() += 1;
        if !state.present.iter().any(|n| n == name) {
            state.present.push(name.to_string());
        }
        Ok(())
    }

    fn user_left(&self, name: &str) -> Result<(), StoreError> {
        self.state().present.retain(|n| n != name);
        Ok(())
    }

    fn update_high_water_mark(&self, chat_users: u64, connected: u64) -> Result<(), StoreError> {
        let mut state = self.state();
        state.high_water = (
            state.high_water.0.max(chat_users),
            state.high_water.1.max(connected),
        );
        Ok(())
    }

    fn enqueue_outbound(&self, message: &str) -> Result<i64, StoreError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.outbound.insert(
            id,
            MemoryMessage {
                message: message.to_string(),
                sent: false,
                sent_at: None,
                retry_count: 0,
                failed: false,
                last_error: None,
            },
        );
        Ok(id)
    }

    fn save_status(&self, status: &StatusSnapshot) -> Result<(), StoreError> {
        self.state().status = Some(status.clone());
        Ok(())
    }

    fn log_user_counts(&self, chat_users: u64, connected: u64) -> Result<(), StoreError> {
        self.state().history.push((Utc::now(), chat_users, connected));
        Ok(())
    }

    fn prune(&self, retention: Duration) -> Result<usize, StoreError> {
        let Some(before) = cutoff(retention) else {
            return Ok(0);
        };
        let mut state = self.state();
        let history = state.history.len();
        state.history.retain(|(at, _, _)| *at >= before);
        let outbound = state.outbound.len();
        state
            .outbound
            .retain(|_, m| !(m.sent && m.sent_at.is_some_and(|at| at < before)));
        Ok(history - state.history.len() + outbound - state.outbound.len())
    }
}

/// Cloneable async front for a [`Store`].
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreHandle")
    }
}

impl StoreHandle {
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Runs `f` against the store on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
