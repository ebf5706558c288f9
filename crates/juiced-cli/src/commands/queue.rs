//! Queue command: stores a message for the running bot to deliver.

use juiced_bot::{SqliteStore, Store};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Enqueues `message` and returns its id.
pub fn enqueue(config: &ClientConfig, message: &str) -> ClientResult<i64> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ClientError::Config("refusing to queue an empty message".into()));
    }
    let store = SqliteStore::open(config.require_database()?)?;
    Ok(store.enqueue_outbound(message)?)
}

pub fn queue(config: &ClientConfig, message: &str) -> ClientResult<()> {
    let id = enqueue(config, message)?;
    println!("queued message {id}");
    Ok(())
}
