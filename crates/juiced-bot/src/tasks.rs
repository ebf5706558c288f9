//! Background tasks bound to one logged-in session.
//!
//! Each task is a periodic loop that checks its own preconditions every
//! cycle and skips the cycle when they are not met:
//!
//! - `outbound`: delivers queued messages (store, live socket, known permissions);
//! - `status`: saves a [`StatusSnapshot`] (store);
//! - `history`: logs user counts and the high-water mark (store);
//! - `maintenance`: prunes old rows (store) and logs room statistics (live socket).

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::outbound;
use crate::store::StatusSnapshot;

/// Names of the session tasks, in spawn order.
pub const TASK_NAMES: [&str; 4] = ["outbound", "status", "history", "maintenance"];

/// How a background task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Cancelled,
    Finished,
    Panicked(String),
}

/// Outcome of every task of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub tasks: Vec<(&'static str, TaskOutcome)>,
}

impl TaskReport {
    pub fn names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }
}

pub(crate) struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(bot: &Bot) -> Self {
        let config = &bot.inner.config;
        let handles = vec![
            ("outbound", tokio::spawn(outbound::run(bot.clone()))),
            (
                "status",
                tokio::spawn(every(config.status_interval, bot.clone(), save_status)),
            ),
            (
                "history",
                tokio::spawn(every(config.history_interval, bot.clone(), record_history)),
            ),
            (
                "maintenance",
                tokio::spawn(every(config.maintenance_interval, bot.clone(), maintain)),
            ),
        ];
        debug!(count = handles.len(), "Started background tasks");
        Self { handles }
    }

    /// Cancels every task and waits for each to finish.
    pub(crate) async fn stop(self) -> TaskReport {
        for (_, handle) in &self.handles {
            handle.abort();
        }
        let mut tasks = Vec::with_capacity(self.handles.len());
        for (name, handle) in self.handles {
            let outcome = match handle.await {
                Ok(()) => TaskOutcome::Finished,
                Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
                Err(e) => {
                    warn!(task = name, error = %e, "Background task panicked");
                    TaskOutcome::Panicked(e.to_string())
                }
            };
            tasks.push((name, outcome));
        }
        TaskReport { tasks }
    }
}

/// Runs `cycle` every `period`, starting immediately.
pub(crate) async fn every<F, Fut>(period: Duration, bot: Bot, cycle: F)
where
    F: Fn(Bot) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        cycle(bot.clone()).await;
    }
}

async fn save_status(bot: Bot) {
    let Some(store) = bot.store() else {
        return;
    };
    let snapshot = StatusSnapshot::from_room(&bot.room().read());
    if let Err(e) = store.call(move |s| s.save_status(&snapshot)).await {
        warn!(error = %e, "Failed to save status");
    }
}

async fn record_history(bot: Bot) {
    let Some(store) = bot.store() else {
        return;
    };
    let (chat_users, connected) = {
        let room = bot.room().read();
        (room.channel.userlist.len() as u64, room.channel.userlist.count)
    };
    let result = store
        .call(move |s| {
            s.log_user_counts(chat_users, connected)?;
            s.update_high_water_mark(chat_users, connected)
        })
        .await;
    if let Err(e) = result {
        warn!(error = %e, "Failed to record user counts");
    }
}

async fn maintain(bot: Bot) {
    if let Some(store) = bot.store() {
        let retention = bot.config().history_retention;
        match store.call(move |s| s.prune(retention)).await {
            Ok(removed) => debug!(removed, "Pruned history"),
            Err(e) => warn!(error = %e, "Failed to prune history"),
        }
    }
    if bot.has_live_socket() {
        let room = bot.room().read();
        info!(
            channel = %room.channel.name,
            users = room.channel.userlist.len(),
            connected = room.channel.userlist.count,
            max_connected = room.channel.userlist.max_count,
            queue = room.channel.playlist.len(),
            "Room statistics"
        );
    }
}
