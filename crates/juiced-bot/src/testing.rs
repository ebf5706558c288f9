//! In-memory websocket and transport doubles shared by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use juiced_protocol::Handshake;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use crate::bot::Connector;
use crate::config::BotConfig;
use crate::error::{BotResult, StoreError, TransportError};
use crate::signals::ShutdownHandle;
use crate::socket_io::{EventSocket, QueuePolicy, SocketIo};
use crate::store::{OutboundMessage, StatusSnapshot, Store};
use crate::transport::{BoxFuture, Transport, WsPair, WsReceiver, WsSender};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct WireState {
    sent: Mutex<Vec<String>>,
    sent_notify: Notify,
    inbound: Mutex<Option<mpsc::UnboundedSender<io::Result<String>>>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
    responder: Mutex<Option<Responder>>,
}

/// The far end of a fake websocket.
#[derive(Clone)]
pub(crate) struct FakeWire {
    state: Arc<WireState>,
}

impl FakeWire {
    /// Queues an inbound frame.
    pub(crate) fn feed(&self, frame: &str) {
        if let Some(tx) = self.state.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    /// Ends the inbound stream after the frames already fed.
    pub(crate) fn hang_up(&self) {
        self.state.inbound.lock().unwrap().take();
    }

    /// Makes every later write fail.
    pub(crate) fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Answers each written frame with the frames the closure returns.
    pub(crate) fn respond<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        *self.state.responder.lock().unwrap() = Some(Box::new(responder));
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.state.sent_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.sent.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

struct FakeSender {
    state: Arc<WireState>,
}

impl WsSender for FakeSender {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            if self.state.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            let replies = match self.state.responder.lock().unwrap().as_mut() {
                Some(responder) => responder(&text),
                None => Vec::new(),
            };
            self.state.sent.lock().unwrap().push(text);
            self.state.sent_notify.notify_waiters();
            if let Some(tx) = self.state.inbound.lock().unwrap().as_ref() {
                for reply in replies {
                    let _ = tx.send(Ok(reply));
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct FakeReceiver {
    rx: mpsc::UnboundedReceiver<io::Result<String>>,
}

impl WsReceiver for FakeReceiver {
    fn recv_text(&mut self) -> BoxFuture<'_, Option<io::Result<String>>> {
        Box::pin(async move { self.rx.recv().await })
    }
}

/// A fake websocket: the wire for the test, the halves for the client.
pub(crate) fn fake_ws() -> (FakeWire, Box<dyn WsSender>, Box<dyn WsReceiver>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(WireState {
        sent: Mutex::new(Vec::new()),
        sent_notify: Notify::new(),
        inbound: Mutex::new(Some(tx)),
        closes: AtomicUsize::new(0),
        fail_writes: AtomicBool::new(false),
        responder: Mutex::new(None),
    });
    (
        FakeWire {
            state: Arc::clone(&state),
        },
        Box::new(FakeSender { state }),
        Box::new(FakeReceiver { rx }),
    )
}

/// A connection over a fake websocket whose keepalive never fires in tests.
pub(crate) fn fake_socket() -> (SocketIo, FakeWire) {
    let (wire, writer, reader) = fake_ws();
    let handshake = Handshake {
        sid: "test".into(),
        ping_interval: Duration::from_secs(3600),
        ping_timeout: Duration::from_secs(3600),
    };
    let socket = SocketIo::from_parts(handshake, writer, reader, 0, QueuePolicy::DropOldest);
    (socket, wire)
}

type GetFn = Box<dyn Fn(&str) -> io::Result<String> + Send + Sync>;

/// A transport serving canned HTTP bodies and pre-built websockets.
pub(crate) struct FakeTransport {
    get: GetFn,
    sockets: Mutex<VecDeque<WsPair>>,
    gets: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn new<F>(get: F) -> Self
    where
        F: Fn(&str) -> io::Result<String> + Send + Sync + 'static,
    {
        Self {
            get: Box::new(get),
            sockets: Mutex::new(VecDeque::new()),
            gets: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `failures` requests, then serves `body`.
    pub(crate) fn failing_gets(failures: usize, body: &str) -> Self {
        let calls = AtomicUsize::new(0);
        let body = body.to_string();
        Self::new(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < failures {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok(body.clone())
            }
        })
    }

    pub(crate) fn push_ws(&self, writer: Box<dyn WsSender>, reader: Box<dyn WsReceiver>) {
        self.sockets.lock().unwrap().push_back((writer, reader));
    }

    pub(crate) fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(async move {
            self.gets.lock().unwrap().push(url.to_string());
            (self.get)(url)
        })
    }

    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<WsPair>> {
        Box::pin(async move {
            self.opened.lock().unwrap().push(url.to_string());
            self.sockets
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no websocket"))
        })
    }
}

/// Hands out prepared connections in order.
pub(crate) struct FakeConnector {
    sockets: Mutex<VecDeque<Arc<dyn EventSocket>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn with_sockets(sockets: Vec<Arc<dyn EventSocket>>) -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(sockets.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        _config: &'a BotConfig,
        _shutdown: &'a ShutdownHandle,
    ) -> BoxFuture<'a, BotResult<Arc<dyn EventSocket>>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.sockets
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::connection_failed("no more sockets").into())
        })
    }
}

/// A store whose every operation fails.
pub(crate) struct FailingStore;

fn offline<T>() -> Result<T, StoreError> {
    Err(StoreError::Task("store offline".to_string()))
}

impl Store for FailingStore {
    fn get_unsent_outbound_messages(
        &self,
        _limit: usize,
        _max_retries: u32,
    ) -> Result<Vec<OutboundMessage>, StoreError> {
        offline()
    }

    fn mark_outbound_sent(&self, _id: i64) -> Result<(), StoreError> {
        offline()
    }

    fn mark_outbound_failed(
        &self,
        _id: i64,
        _reason: &str,
        _is_permanent: bool,
    ) -> Result<(), StoreError> {
        offline()
    }

    fn user_joined(&self, _name: &str) -> Result<(), StoreError> {
        offline()
    }

    fn user_left(&self, _name: &str) -> Result<(), StoreError> {
        offline()
    }

    fn update_high_water_mark(&self, _chat_users: u64, _connected: u64) -> Result<(), StoreError> {
        offline()
    }

    fn enqueue_outbound(&self, _message: &str) -> Result<i64, StoreError> {
        offline()
    }

    fn save_status(&self, _status: &StatusSnapshot) -> Result<(), StoreError> {
        offline()
    }

    fn log_user_counts(&self, _chat_users: u64, _connected: u64) -> Result<(), StoreError> {
        offline()
    }

    fn prune(&self, _retention: Duration) -> Result<usize, StoreError> {
        offline()
    }
}

fn event(name: &str, data: Value) -> String {
    format!("42{}", json!([name, data]))
}

/// Plays a cooperative channel server for `user` on the wire.
pub(crate) fn serve_channel(wire: &FakeWire, user: &str) {
    let user = user.to_string();
    let mut next_uid = 100u64;
    wire.respond(move |frame| {
        let Some(Ok(Value::Array(packet))) = frame.strip_prefix("42").map(serde_json::from_str::<Value>) else {
            return vec![];
        };
        let name = packet.first().and_then(Value::as_str).unwrap_or_default();
        let data = packet.get(1).cloned().unwrap_or(Value::Null);
        match name {
            "login" => vec![
                event("login", json!({ "success": true, "name": user })),
                event("rank", json!(2)),
            ],
            "joinChannel" => vec![
                event(
                    "setPermissions",
                    json!({
                        "chat": 0, "kick": 2, "leaderctl": 2,
                        "playlistadd": 1, "oplaylistadd": 0,
                        "playlistdelete": 2, "oplaylistdelete": 2,
                        "playlistmove": 1, "oplaylistmove": 1,
                        "playlistjump": 2, "oplaylistjump": 2,
                    }),
                ),
                event("userlist", json!([{ "name": user, "rank": 2 }])),
            ],
            "chatMsg" => {
                let msg = data["msg"].as_str().unwrap_or_default();
                if let Some(rest) = msg.strip_prefix("/kick ") {
                    let target = rest.split_whitespace().next().unwrap_or_default();
                    vec![event("userLeave", json!({ "name": target }))]
                } else if msg == "/afk" {
                    vec![event("setAFK", json!({ "name": user, "afk": true }))]
                } else {
                    vec![event("chatMsg", json!({ "username": user, "msg": msg, "meta": {} }))]
                }
            }
            "pm" => vec![event(
                "pm",
                json!({ "username": user, "to": data["to"], "msg": data["msg"], "meta": {} }),
            )],
            "queue" => {
                next_uid += 1;
                vec![event(
                    "queue",
                    json!({
                        "item": {
                            "uid": next_uid, "temp": data["temp"], "queueby": user,
                            "media": { "type": data["type"], "id": data["id"], "title": "queued", "seconds": 60 },
                        },
                        "after": if data["pos"] == "end" { json!(null) } else { json!("prepend") },
                    }),
                )]
            }
            "delete" => vec![event("delete", json!({ "uid": data }))],
            "moveMedia" => vec![event("moveVideo", data)],
            "jumpTo" => vec![event("setCurrent", data)],
            "assignLeader" => vec![event("setLeader", data["name"].clone())],
            "mediaUpdate" => vec![event("mediaUpdate", data)],
            "setChannelRank" => vec![event("setUserRank", data)],
            _ => vec![],
        }
    });
}
