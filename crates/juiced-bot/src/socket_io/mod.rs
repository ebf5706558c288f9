//! Socket.IO connection.
//!
//! [`SocketIo::connect`] performs the polling handshake, upgrades to a
//! websocket with the probe exchange and joins the default namespace. The
//! resulting connection runs two tasks:
//!
//! - the receive task decodes frames, answers pings, hands events to
//!   pending responses or to the inbound queue;
//! - the keepalive task fails the connection with
//!   [`TransportError::PingTimeout`] when nothing arrives for
//!   `ping_interval + ping_timeout`.
//!
//! The first terminal error is kept and returned by every later `recv` and
//! `emit` call.

mod pending;
mod queue;

pub use pending::{PendingResponse, PendingResponses, ResponseMatcher};
pub use queue::{EventQueue, QueuePolicy};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use juiced_protocol::{
    CONNECT, Handshake, PROBE, PROBE_ACK, Packet, UPGRADE, encode_event, encode_pong,
    handshake_url, websocket_url,
};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::error::TransportError;
use crate::signals::ShutdownHandle;
use crate::transport::{BoxFuture, Transport, WsReceiver, WsSender};

/// The event-level interface of a live connection.
pub trait EventSocket: Send + Sync {
    /// Sends an event.
    ///
    /// With a matcher, waits up to `timeout` (forever if `None`) for the
    /// first inbound event it accepts and returns it. A timeout yields
    /// `Ok(None)`.
    fn emit<'a>(
        &'a self,
        event: &'a str,
        data: Value,
        matcher: Option<ResponseMatcher>,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Result<Option<(String, Value)>, TransportError>>;

    /// Next inbound event not taken by a pending response.
    fn recv(&self) -> BoxFuture<'_, Result<(String, Value), TransportError>>;

    /// Closes the connection. Safe to call more than once.
    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// The terminal error, if the connection has failed.
    fn error(&self) -> Option<TransportError>;
}

/// Connect-time settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Attempts after the first failure.
    pub retry: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for ConnectOptions {
    fn from(config: &BotConfig) -> Self {
        Self {
            retry: config.connect_retry,
            retry_delay: config.connect_retry_delay,
            queue_capacity: config.queue_capacity,
            queue_policy: config.queue_policy,
        }
    }
}

struct Shared {
    writer: tokio::sync::Mutex<Box<dyn WsSender>>,
    queue: EventQueue,
    pending: Arc<PendingResponses>,
    error: Mutex<Option<TransportError>>,
    closed: AtomicBool,
    alive: Notify,
}

impl Shared {
    fn error_slot(&self) -> MutexGuard<'_, Option<TransportError>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self) -> Option<TransportError> {
        self.error_slot().clone()
    }

    /// Records the terminal error (first one wins) and wakes every waiter.
    fn fail(&self, err: TransportError) {
        {
            let mut slot = self.error_slot();
            if slot.is_none() {
                warn!(error = %err, "Connection failed");
                *slot = Some(err);
            }
        }
        self.queue.close();
        self.pending.fail_all();
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .send_text(frame)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Closes the websocket once.
    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.queue.close();
        self.pending.fail_all();
        self.writer
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// A live Socket.IO connection.
pub struct SocketIo {
    shared: Arc<Shared>,
    handshake: Handshake,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketIo {
    /// Connects to a Socket.IO endpoint such as `https://host:8443/socket.io/`.
    ///
    /// Failed attempts are retried `options.retry` times. Triggering
    /// `shutdown` aborts at once, including during the wait between attempts.
    pub async fn connect(
        transport: &dyn Transport,
        endpoint: &str,
        options: &ConnectOptions,
        shutdown: &ShutdownHandle,
    ) -> Result<Self, TransportError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.wait().wait() => return Err(TransportError::Cancelled),
                result = Self::connect_once(transport, endpoint, options) => result,
            };
            let err = match result {
                Ok(socket) => return Ok(socket),
                Err(err) => err,
            };
            if attempt >= options.retry {
                return Err(err);
            }
            attempt += 1;
            warn!(
                error = %err,
                attempt,
                retry = options.retry,
                delay_ms = options.retry_delay.as_millis() as u64,
                "Connect failed, retrying"
            );
            tokio::select! {
                biased;
                _ = shutdown.wait().wait() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(options.retry_delay) => {}
            }
        }
    }

    async fn connect_once(
        transport: &dyn Transport,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<Self, TransportError> {
        let url = handshake_url(endpoint)?;
        debug!(url = %url, "Handshake");
        let body = transport
            .get(&url)
            .await
            .map_err(|e| TransportError::connection_failed(format!("handshake request: {e}")))?;
        let handshake = Handshake::parse(&body)?;

        let url = websocket_url(endpoint, &handshake.sid)?;
        debug!(url = %url, "Opening websocket");
        let (mut writer, mut reader) = transport
            .open(&url)
            .await
            .map_err(|e| TransportError::connection_failed(format!("websocket: {e}")))?;

        if let Err(err) = Self::upgrade(writer.as_mut(), reader.as_mut(), &handshake).await {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Closing websocket after failed upgrade");
            }
            return Err(err);
        }

        info!(
            sid = %handshake.sid,
            ping_interval_ms = handshake.ping_interval.as_millis() as u64,
            ping_timeout_ms = handshake.ping_timeout.as_millis() as u64,
            "Connected"
        );
        Ok(Self::from_parts(
            handshake,
            writer,
            reader,
            options.queue_capacity,
            options.queue_policy,
        ))
    }

    async fn upgrade(
        writer: &mut dyn WsSender,
        reader: &mut dyn WsReceiver,
        handshake: &Handshake,
    ) -> Result<(), TransportError> {
        writer.send_text(PROBE.to_string()).await?;
        let reply = tokio::time::timeout(handshake.liveness_deadline(), reader.recv_text())
            .await
            .map_err(|_| TransportError::connection_failed("probe timed out"))?;
        match reply {
            Some(Ok(reply)) if reply == PROBE_ACK => {}
            Some(Ok(reply)) => {
                return Err(TransportError::connection_failed(format!(
                    "unexpected probe response {reply:?}"
                )));
            }
            Some(Err(e)) => return Err(TransportError::connection_failed(e.to_string())),
            None => return Err(TransportError::connection_failed("closed during probe")),
        }
        writer.send_text(UPGRADE.to_string()).await?;
        writer.send_text(CONNECT.to_string()).await?;
        Ok(())
    }

    /// Starts a connection over an already upgraded websocket.
    pub fn from_parts(
        handshake: Handshake,
        writer: Box<dyn WsSender>,
        reader: Box<dyn WsReceiver>,
        queue_capacity: usize,
        queue_policy: QueuePolicy,
    ) -> Self {
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(writer),
            queue: EventQueue::new(queue_capacity, queue_policy),
            pending: PendingResponses::new(),
            error: Mutex::new(None),
            closed: AtomicBool::new(false),
            alive: Notify::new(),
        });
        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared), reader));
        let keepalive = tokio::spawn(keepalive_loop(
            Arc::clone(&shared),
            handshake.liveness_deadline(),
        ));
        Self {
            shared,
            handshake,
            tasks: Mutex::new(vec![receiver, keepalive]),
        }
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Number of responses still awaited.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    fn abort_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }

    async fn emit_inner(
        &self,
        event: &str,
        data: Value,
        matcher: Option<ResponseMatcher>,
        timeout: Option<Duration>,
    ) -> Result<Option<(String, Value)>, TransportError> {
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        let frame = encode_event(event, &data);
        // Registered before writing so a fast reply cannot slip past.
        let mut pending = matcher.map(|m| self.shared.pending.register(m));
        debug!(event, "emit");
        self.shared.send(frame).await?;

        let Some(pending) = pending.as_mut() else {
            return Ok(None);
        };
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(event, timeout_ms = limit.as_millis() as u64, "Response timed out");
                    return Ok(None);
                }
            },
            None => pending.wait().await,
        };
        match outcome {
            Some(matched) => Ok(Some(matched)),
            None => Err(self
                .shared
                .error()
                .unwrap_or_else(|| TransportError::closed("connection closed"))),
        }
    }

    async fn recv_inner(&self) -> Result<(String, Value), TransportError> {
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        match self.shared.queue.pop().await {
            Some(event) => Ok(event),
            None => Err(self
                .shared
                .error()
                .unwrap_or_else(|| TransportError::closed("connection closed"))),
        }
    }

    async fn close_inner(&self) -> Result<(), TransportError> {
        {
            let mut slot = self.shared.error_slot();
            if slot.is_none() {
                *slot = Some(TransportError::closed("closed by client"));
            }
        }
        self.abort_tasks();
        let result = self.shared.shutdown().await;
        debug!(sid = %self.handshake.sid, "Connection closed");
        result
    }
}

impl EventSocket for SocketIo {
    fn emit<'a>(
        &'a self,
        event: &'a str,
        data: Value,
        matcher: Option<ResponseMatcher>,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Result<Option<(String, Value)>, TransportError>> {
        Box::pin(self.emit_inner(event, data, matcher, timeout))
    }

    fn recv(&self) -> BoxFuture<'_, Result<(String, Value), TransportError>> {
        Box::pin(self.recv_inner())
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.close_inner())
    }

    fn error(&self) -> Option<TransportError> {
        self.shared.error()
    }
}

impl Drop for SocketIo {
    fn drop(&mut self) {
        self.abort_tasks();
        self.shared.queue.close();
        self.shared.pending.fail_all();
    }
}

async fn receive_loop(shared: Arc<Shared>, mut reader: Box<dyn WsReceiver>) {
    loop {
        let frame = match reader.recv_text().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                shared.fail(TransportError::closed(e.to_string()));
                break;
            }
            None => {
                shared.fail(TransportError::closed("closed by peer"));
                break;
            }
        };
        match Packet::decode(&frame) {
            Ok(Packet::Ping(payload)) => {
                shared.alive.notify_one();
                if let Err(err) = shared.send(encode_pong(&payload)).await {
                    shared.fail(err);
                    break;
                }
            }
            Ok(Packet::Pong(_)) => shared.alive.notify_one(),
            Ok(Packet::Event { name, data }) => {
                debug!(event = %name, "recv");
                if shared.pending.resolve(&name, &data) {
                    continue;
                }
                if !shared.queue.push((name, data)).await {
                    break;
                }
            }
            Ok(Packet::Unknown(frame)) => warn!(frame = %frame, "Ignoring unknown packet"),
            Err(e) => warn!(error = %e, frame = %frame, "Dropping malformed packet"),
        }
    }
    if let Err(e) = shared.shutdown().await {
        debug!(error = %e, "Closing websocket after receive loop ended");
    }
}

async fn keepalive_loop(shared: Arc<Shared>, deadline: Duration) {
    loop {
        if tokio::time::timeout(deadline, shared.alive.notified())
            .await
            .is_err()
        {
            shared.fail(TransportError::PingTimeout);
            if let Err(e) = shared.shutdown().await {
                debug!(error = %e, "Closing websocket after ping timeout");
            }
            return;
        }
    }
}
