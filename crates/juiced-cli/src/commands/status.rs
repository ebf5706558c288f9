//! Status command: prints what the bot last recorded.

use chrono::Local;
use juiced_bot::{SqliteStore, StatusSnapshot};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Formats a snapshot for the terminal.
pub fn describe(status: &StatusSnapshot, high_water_mark: Option<(u64, u64)>) -> String {
    let mut lines = vec![
        format!("channel:   {}", status.channel),
        format!(
            "updated:   {}",
            status.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        format!("users:     {} in chat, {} connected", status.users.len(), status.connected),
        format!("leader:    {}", status.leader.as_deref().unwrap_or("-")),
        format!("playing:   {}", status.current_media.as_deref().unwrap_or("-")),
        format!("playlist:  {} items", status.queue_length),
    ];
    if let Some((chat, connected)) = high_water_mark {
        lines.push(format!("peak:      {chat} in chat, {connected} connected"));
    }
    if !status.users.is_empty() {
        lines.push(format!("in chat:   {}", status.users.join(", ")));
    }
    lines.join("\n")
}

pub fn status(config: &ClientConfig) -> ClientResult<()> {
    let store = SqliteStore::open(config.require_database()?)?;
    match store.latest_status()? {
        Some(status) => println!("{}", describe(&status, store.high_water_mark()?)),
        None => println!("No status recorded yet."),
    }
    Ok(())
}
