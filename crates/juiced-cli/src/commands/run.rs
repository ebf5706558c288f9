//! Run command: joins the channel in the foreground.
//!
//! Starts the signal listener, opens the database when one is configured,
//! attaches the console and runs the bot until SIGINT/SIGTERM or a fatal
//! error. An unusable database only disables the outbound queue and history.

use std::path::Path;

use juiced_bot::{Bot, ShutdownHandle, SignalHandler, SqliteStore, StoreHandle, TaskOutcome};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::console;
use crate::error::ClientResult;

/// Opens the configured database, or `None` when it cannot be used.
fn open_store(path: &Path) -> Option<StoreHandle> {
    match SqliteStore::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "Using database");
            Some(StoreHandle::new(store))
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Database unavailable; outbound queue and history are disabled"
            );
            None
        }
    }
}

fn build_bot(
    config: &ClientConfig,
    no_reconnect: bool,
    shutdown: ShutdownHandle,
) -> ClientResult<Bot> {
    let mut bot_config = config.to_bot_config()?;
    if no_reconnect {
        bot_config.restart_delay = None;
    }

    let mut builder = Bot::builder(bot_config).shutdown(shutdown);
    match &config.database {
        Some(path) => {
            if let Some(store) = open_store(path) {
                builder = builder.store(store);
            }
        }
        None => info!("No database configured; outbound queue and history are disabled"),
    }
    let bot = builder.build()?;
    console::attach(bot.registry());
    Ok(bot)
}

pub async fn run(config: &ClientConfig, no_reconnect: bool) -> ClientResult<()> {
    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let bot = build_bot(config, no_reconnect, signal_handler.shutdown_handle())?;

    info!(domain = %config.domain, channel = %config.channel, "Starting");
    let result = bot.run().await;

    if let Some(report) = bot.last_task_report() {
        for (name, outcome) in &report.tasks {
            if let TaskOutcome::Panicked(reason) = outcome {
                warn!(task = name, reason = %reason, "Background task failed");
            }
        }
    }
    info!("Stopped");
    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(database: Option<&Path>) -> ClientConfig {
        ClientConfig {
            channel: "lobby".to_string(),
            database: database.map(Path::to_path_buf),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn unusable_database_is_skipped() {
        assert!(open_store(Path::new("/dev/null/sub/juiced.db")).is_none());
    }

    #[test]
    fn bot_starts_without_unusable_database() {
        let config = lobby(Some(Path::new("/dev/null/sub/juiced.db")));
        let bot = build_bot(&config, true, ShutdownHandle::new()).unwrap();
        assert!(bot.store().is_none());
        assert_eq!(bot.config().restart_delay, None);
    }

    #[test]
    fn bot_uses_configured_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = lobby(Some(&dir.path().join("data").join("juiced.db")));
        let bot = build_bot(&config, false, ShutdownHandle::new()).unwrap();
        assert!(bot.store().is_some());
    }

    #[test]
    fn bot_without_database() {
        let bot = build_bot(&lobby(None), false, ShutdownHandle::new()).unwrap();
        assert!(bot.store().is_none());
        for event in console::EVENTS {
            assert!(bot.registry().count(event) >= 1);
        }
    }
}
