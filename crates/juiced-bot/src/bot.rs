//! The channel bot: connection lifecycle, login and the receive loop.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use juiced_core::RANK_ANONYMOUS;
use juiced_protocol::{SocketConfig, socket_config_url};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::dispatch::{Propagation, Registry};
use crate::error::{BotError, BotResult, TransportError};
use crate::handlers;
use crate::signals::ShutdownHandle;
use crate::socket_io::{ConnectOptions, EventSocket, ResponseMatcher, SocketIo};
use crate::state::RoomState;
use crate::store::StoreHandle;
use crate::tasks::{BackgroundTasks, TaskReport};
use crate::transport::{BoxFuture, NetTransport, Transport};

/// Opens event sockets for a channel.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        config: &'a BotConfig,
        shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, BotResult<Arc<dyn EventSocket>>>;
}

/// Discovers the channel's server through its socket config, then connects.
pub struct ChannelConnector {
    transport: Arc<dyn Transport>,
}

impl ChannelConnector {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn discover(&self, config: &BotConfig) -> BotResult<String> {
        let url = socket_config_url(&config.domain, &config.channel);
        debug!(url = %url, "Fetching socket config");
        let body = self
            .transport
            .get(&url)
            .await
            .map_err(|e| BotError::socket_config(format!("{url}: {e}")))?;
        let servers =
            SocketConfig::parse(&body).map_err(|e| BotError::socket_config(e.to_string()))?;
        let server = servers
            .pick()
            .map_err(|e| BotError::socket_config(e.to_string()))?;
        Ok(server.endpoint())
    }
}

impl Connector for ChannelConnector {
    fn connect<'a>(
        &'a self,
        config: &'a BotConfig,
        shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, BotResult<Arc<dyn EventSocket>>> {
        Box::pin(async move {
            let endpoint = self.discover(config).await?;
            info!(endpoint = %endpoint, channel = %config.channel, "Connecting");
            let socket = SocketIo::connect(
                self.transport.as_ref(),
                &endpoint,
                &ConnectOptions::from(config),
                shutdown,
            )
            .await?;
            Ok(Arc::new(socket) as Arc<dyn EventSocket>)
        })
    }
}

/// Where the bot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Connecting,
    LoggedIn,
    Running,
    Reconnecting,
    Stopped,
}

pub(crate) struct BotInner {
    pub(crate) config: BotConfig,
    connector: Arc<dyn Connector>,
    pub(crate) registry: Registry,
    pub(crate) room: RoomState,
    socket: RwLock<Option<Arc<dyn EventSocket>>>,
    pub(crate) store: Option<StoreHandle>,
    shutdown: ShutdownHandle,
    state: Mutex<BotState>,
    task_report: Mutex<Option<TaskReport>>,
}

/// A bot connected (or connecting) to one channel.
///
/// Cheap to clone; clones share the same connection and state.
#[derive(Clone)]
pub struct Bot {
    pub(crate) inner: Arc<BotInner>,
}

/// Builds a [`Bot`].
pub struct BotBuilder {
    config: BotConfig,
    connector: Option<Arc<dyn Connector>>,
    store: Option<StoreHandle>,
    shutdown: Option<ShutdownHandle>,
}

impl BotBuilder {
    /// Persistence backend. Without one, outbound delivery and presence
    /// metrics are disabled.
    pub fn store(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Replaces the network connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> BotResult<Bot> {
        self.config.validate()?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let transport = NetTransport::new(self.config.transport.clone())?;
                Arc::new(ChannelConnector::new(Arc::new(transport)))
            }
        };
        let room = RoomState::new(self.config.channel.clone());
        let registry = Registry::new();
        handlers::register(&registry, &room, self.store.as_ref());
        Ok(Bot {
            inner: Arc::new(BotInner {
                config: self.config,
                connector,
                registry,
                room,
                socket: RwLock::new(None),
                store: self.store,
                shutdown: self.shutdown.unwrap_or_default(),
                state: Mutex::new(BotState::Idle),
                task_report: Mutex::new(None),
            }),
        })
    }
}

impl Bot {
    pub fn builder(config: BotConfig) -> BotBuilder {
        BotBuilder {
            config,
            connector: None,
            store: None,
            shutdown: None,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    /// Room state mirror.
    pub fn room(&self) -> &RoomState {
        &self.inner.room
    }

    /// Event handlers. Register handlers here to observe server events.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn store(&self) -> Option<&StoreHandle> {
        self.inner.store.as_ref()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.shutdown.clone()
    }

    pub fn state(&self) -> BotState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: BotState) {
        let mut current = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!(from = ?*current, to = ?state, "State change");
            *current = state;
        }
    }

    /// How the background tasks of the last session ended.
    pub fn last_task_report(&self) -> Option<TaskReport> {
        self.inner
            .task_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current connection, if any.
    pub fn socket(&self) -> Option<Arc<dyn EventSocket>> {
        self.inner
            .socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current connection if it has not failed.
    pub(crate) fn live_socket(&self) -> BotResult<Arc<dyn EventSocket>> {
        match self.socket() {
            Some(socket) => match socket.error() {
                Some(err) => Err(err.into()),
                None => Ok(socket),
            },
            None => Err(TransportError::closed("not connected").into()),
        }
    }

    pub(crate) fn has_live_socket(&self) -> bool {
        self.socket().is_some_and(|s| s.error().is_none())
    }

    /// Dispatches an event through the registry.
    pub async fn trigger(&self, event: &str, data: &Value) -> BotResult<Propagation> {
        self.inner.registry.trigger(event, data).await
    }

    /// Connects, authenticates and joins the channel.
    ///
    /// On failure the connection is closed again.
    pub async fn login(&self) -> BotResult<()> {
        self.set_state(BotState::Connecting);
        let socket = self
            .inner
            .connector
            .connect(&self.inner.config, &self.inner.shutdown)
            .await?;
        *self
            .inner
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&socket));

        if let Err(err) = self.authenticate(socket.as_ref()).await {
            if let Err(e) = self.disconnect().await {
                debug!(error = %e, "Close after failed login");
            }
            return Err(err);
        }
        self.set_state(BotState::LoggedIn);
        info!(channel = %self.inner.config.channel, "Joined channel");
        Ok(())
    }

    async fn authenticate(&self, socket: &dyn EventSocket) -> BotResult<()> {
        let config = &self.inner.config;
        let timeout = Some(config.response_timeout);

        if let Some(name) = &config.user {
            self.inner.room.write().user.name = name.clone();
            let mut data = json!({ "name": name });
            if let Some(password) = &config.password {
                data["pw"] = json!(password);
            }
            let (event, reply) = socket
                .emit("login", data, Some(ResponseMatcher::event("login")), timeout)
                .await?
                .ok_or_else(|| BotError::login("no response to login"))?;
            if reply.get("success").and_then(Value::as_bool) != Some(true) {
                let reason = reply
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("rejected by server");
                return Err(BotError::login(reason));
            }
            self.trigger(&event, &reply).await?;
        }

        let join = ResponseMatcher::events(["needPassword", "setPermissions"]);
        let mut reply = socket
            .emit(
                "joinChannel",
                json!({ "name": config.channel }),
                Some(join.clone()),
                timeout,
            )
            .await?
            .ok_or_else(|| BotError::login("no response to joinChannel"))?;

        if needs_password(&reply) {
            let Some(password) = &config.channel_password else {
                return Err(BotError::login("channel password required"));
            };
            reply = socket
                .emit("channelPassword", json!(password), Some(join), timeout)
                .await?
                .ok_or_else(|| BotError::login("no response to channelPassword"))?;
            if needs_password(&reply) {
                return Err(BotError::login("invalid channel password"));
            }
        }
        self.trigger(&reply.0, &reply.1).await?;
        Ok(())
    }

    /// Closes and drops the connection. The acting user's rank is reset even
    /// if closing fails.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let socket = self
            .inner
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let result = match socket {
            Some(socket) => socket.close().await,
            None => Ok(()),
        };
        self.inner.room.write().user.rank = RANK_ANONYMOUS;
        result
    }

    /// Runs until shutdown, a fatal error, or a connection loss with
    /// reconnecting disabled.
    ///
    /// Each session logs in, starts the background tasks and dispatches
    /// inbound events. When the session ends the tasks are cancelled and
    /// awaited before the connection is dropped.
    pub async fn run(&self) -> BotResult<()> {
        let shutdown = self.inner.shutdown.clone();
        let result = loop {
            if shutdown.is_shutdown() {
                break Ok(());
            }
            let login = tokio::select! {
                biased;
                _ = shutdown.wait().wait() => break Ok(()),
                result = self.login() => result,
            };
            let err = match login {
                Ok(()) => match self.session(&shutdown).await {
                    Ok(()) => break Ok(()),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if matches!(err, BotError::Transport(TransportError::Cancelled)) {
                break Ok(());
            }
            if !err.is_transport() {
                error!(error = %err, "Stopping");
                break Err(err);
            }
            let Some(delay) = self.inner.config.restart_delay else {
                warn!(error = %err, "Connection lost, reconnect disabled");
                break Err(err);
            };
            warn!(error = %err, delay_ms = delay.as_millis() as u64, "Connection lost, reconnecting");
            self.set_state(BotState::Reconnecting);
            tokio::select! {
                biased;
                _ = shutdown.wait().wait() => break Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        };
        if let Err(e) = self.disconnect().await {
            debug!(error = %e, "Close on stop");
        }
        self.set_state(BotState::Stopped);
        info!("Bot stopped");
        result
    }

    async fn session(&self, shutdown: &ShutdownHandle) -> BotResult<()> {
        let socket = self.live_socket()?;
        self.set_state(BotState::Running);
        let tasks = BackgroundTasks::spawn(self);

        let result = self.pump(socket.as_ref(), shutdown).await;

        let report = tasks.stop().await;
        debug!(?report, "Background tasks stopped");
        *self
            .inner
            .task_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report);
        if let Err(e) = self.disconnect().await {
            debug!(error = %e, "Close after session");
        }
        result
    }

    async fn pump(&self, socket: &dyn EventSocket, shutdown: &ShutdownHandle) -> BotResult<()> {
        loop {
            let (event, data) = tokio::select! {
                biased;
                _ = shutdown.wait().wait() => return Ok(()),
                received = socket.recv() => received?,
            };
            self.trigger(&event, &data).await?;
        }
    }
}

fn needs_password(reply: &(String, Value)) -> bool {
    reply.0 == "needPassword" && truthy(&reply.1)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
