//! Channel bot: connection, event dispatch, actions and background tasks.
//!
//! A [`Bot`] logs into a single channel over the Socket.IO websocket
//! transport, mirrors the channel into [`RoomState`], dispatches inbound
//! events through a [`Registry`] and exposes the channel's actions (chat,
//! playlist, moderation) as async methods. While a session is up,
//! background tasks deliver queued outbound messages and persist status
//! and user-count history through a [`Store`].
//!
//! # Example
//!
//! ```rust,no_run
//! use juiced_bot::{Bot, BotConfig, SqliteStore, StoreHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BotConfig::new("cytu.be", "lobby").with_user("juiced", None);
//!     let store = StoreHandle::new(SqliteStore::open("juiced.db")?);
//!     let bot = Bot::builder(config).store(store).build()?;
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```

mod actions;
mod bot;
mod config;
mod dispatch;
mod error;
mod handlers;
mod outbound;
mod signals;
pub mod socket_io;
mod state;
mod store;
mod tasks;
mod transport;

#[cfg(test)]
mod testing;

pub use bot::{Bot, BotBuilder, BotState, ChannelConnector, Connector};
pub use config::{BotConfig, DEFAULT_PROXY_PORT, ProxyConfig, TransportConfig};
pub use dispatch::{Handler, ImmediateFn, Propagation, Registry, SuspendingFn};
pub use error::{BotError, BotResult, StoreError, TransportError};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket_io::{ConnectOptions, EventSocket, QueuePolicy, ResponseMatcher, SocketIo};
pub use state::{Room, RoomState};
pub use store::{MemoryStore, OutboundMessage, SqliteStore, StatusSnapshot, Store, StoreHandle};
pub use tasks::{TASK_NAMES, TaskOutcome, TaskReport};
pub use transport::{BoxFuture, NetTransport, Transport, WsPair, WsReceiver, WsSender};
