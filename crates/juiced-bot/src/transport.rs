//! HTTP and websocket transport.
//!
//! The Socket.IO client talks to the network through the [`Transport`]
//! trait so the handshake and frame handling can run against in-memory
//! fakes. [`NetTransport`] is the real implementation: reqwest for the
//! polling handshake and socket config, tokio-tungstenite for the websocket.
//!
//! Proxying is explicit. When a [`ProxyConfig`] is set, both HTTP requests
//! and websocket connections go through the SOCKS5 proxy, except for
//! loopback targets which always connect directly.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::TargetAddr;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::{Host, Url};

use crate::config::{ProxyConfig, TransportConfig};
use crate::error::BotError;

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a websocket.
pub trait WsSender: Send {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, io::Result<()>>;
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// Read half of a websocket.
pub trait WsReceiver: Send {
    /// Next text frame. `None` once the peer has closed the socket.
    fn recv_text(&mut self) -> BoxFuture<'_, Option<io::Result<String>>>;
}

/// A split websocket.
pub type WsPair = (Box<dyn WsSender>, Box<dyn WsReceiver>);

/// Network access used to reach the server.
pub trait Transport: Send + Sync {
    /// Fetches a URL and returns the response body.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<String>>;

    /// Opens a websocket.
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<WsPair>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TungsteniteSender {
    sink: SplitSink<WsStream, Message>,
}

impl WsSender for TungsteniteSender {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            trace!(frame = %text, "ws send");
            self.sink
                .send(Message::Text(text.into()))
                .await
                .map_err(io::Error::other)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { self.sink.close().await.map_err(io::Error::other) })
    }
}

struct TungsteniteReceiver {
    stream: SplitStream<WsStream>,
}

impl WsReceiver for TungsteniteReceiver {
    fn recv_text(&mut self) -> BoxFuture<'_, Option<io::Result<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        trace!(frame = %text, "ws recv");
                        return Some(Ok(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Websocket closed by peer");
                        return None;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => return None,
                    Some(Err(e)) => return Some(Err(io::Error::other(e))),
                }
            }
        })
    }
}

/// Transport over the real network.
pub struct NetTransport {
    config: TransportConfig,
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
}

impl NetTransport {
    pub fn new(config: TransportConfig) -> Result<Self, BotError> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(config.request_timeout)
        };
        let direct = builder()
            .no_proxy()
            .build()
            .map_err(|e| BotError::Config(format!("failed to create HTTP client: {e}")))?;
        let proxied = match &config.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.url())
                    .map_err(|e| BotError::ProxyConfig(e.to_string()))?;
                Some(
                    builder()
                        .proxy(proxy)
                        .build()
                        .map_err(|e| BotError::ProxyConfig(e.to_string()))?,
                )
            }
            None => None,
        };
        Ok(Self {
            config,
            direct,
            proxied,
        })
    }

    fn proxy_for(&self, url: &Url) -> Option<&ProxyConfig> {
        self.config
            .proxy
            .as_ref()
            .filter(|_| !url.host().is_some_and(|h| is_loopback(&h)))
    }

    async fn fetch(&self, url: &str) -> io::Result<String> {
        let parsed = Url::parse(url).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let client = match (&self.proxied, self.proxy_for(&parsed)) {
            (Some(proxied), Some(_)) => proxied,
            _ => &self.direct,
        };
        debug!(url, "GET");
        client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(io::Error::other)?
            .text()
            .await
            .map_err(io::Error::other)
    }

    async fn connect_ws(&self, url: &str) -> io::Result<WsPair> {
        let parsed = Url::parse(url).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no port"))?;

        let stream = match self.proxy_for(&parsed) {
            Some(proxy) => {
                debug!(proxy = %proxy.url(), host = %host, port, "Connecting through proxy");
                let stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
                socks5_connect(stream, &host, port, proxy.remote_dns).await?
            }
            None => TcpStream::connect((host.as_str(), port)).await?,
        };

        let mut request = url.into_client_request().map_err(io::Error::other)?;
        if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
            request.headers_mut().insert("User-Agent", agent);
        }
        let (ws, _response) = tokio_tungstenite::client_async_tls(request, stream)
            .await
            .map_err(io::Error::other)?;
        let (sink, stream) = ws.split();
        Ok((
            Box::new(TungsteniteSender { sink }),
            Box::new(TungsteniteReceiver { stream }),
        ))
    }
}

impl Transport for NetTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(self.fetch(url))
    }

    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, io::Result<WsPair>> {
        Box::pin(async move {
            tokio::time::timeout(self.config.request_timeout, self.connect_ws(url))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "websocket connect timed out"))?
        })
    }
}

fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}

fn socks_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, message.into())
}

/// Opens a SOCKS5 tunnel (no authentication) to `host:port` over an
/// established proxy stream and hands the stream back.
///
/// Without `remote_dns` the host name is resolved locally and the proxy
/// only ever sees an address.
pub async fn socks5_connect<S>(
    stream: S,
    host: &str,
    port: u16,
    remote_dns: bool,
) -> io::Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = match host.parse::<IpAddr>() {
        Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
        Err(_) if remote_dns => TargetAddr::Domain(host.into(), port),
        Err(_) => TargetAddr::Ip(
            tokio::net::lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| socks_error(format!("could not resolve {host}")))?,
        ),
    };
    Socks5Stream::connect_with_socket(stream, target)
        .await
        .map(Socks5Stream::into_inner)
        .map_err(|e| socks_error(format!("proxy CONNECT to {host}:{port} failed: {e}")))
}
