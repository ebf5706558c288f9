//! Bot configuration.

use std::time::Duration;

use crate::error::BotError;
use crate::socket_io::QueuePolicy;

/// Default SOCKS port when a proxy address has none.
pub const DEFAULT_PROXY_PORT: u16 = 1080;

/// A SOCKS5 proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Let the proxy resolve target hostnames instead of resolving locally.
    pub remote_dns: bool,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            remote_dns: true,
        }
    }

    /// Parses `host[:port]`.
    pub fn parse(address: &str) -> Result<Self, BotError> {
        let address = address.trim();
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    BotError::ProxyConfig(format!("invalid proxy port in {address:?}"))
                })?;
                (host, port)
            }
            None => (address, DEFAULT_PROXY_PORT),
        };
        if host.is_empty() {
            return Err(BotError::ProxyConfig(format!(
                "missing proxy host in {address:?}"
            )));
        }
        Ok(Self::new(host, port))
    }

    /// Builder: resolve hostnames locally.
    pub fn with_local_dns(mut self) -> Self {
        self.remote_dns = false;
        self
    }

    /// The proxy URL in the form reqwest expects.
    pub fn url(&self) -> String {
        let scheme = if self.remote_dns { "socks5h" } else { "socks5" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// How the HTTP and websocket connections reach the server.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Route connections through this proxy. Loopback targets always connect directly.
    pub proxy: Option<ProxyConfig>,
    pub user_agent: String,
    /// Timeout for HTTP requests and the websocket handshake.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: format!("juiced/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Site hosting the channel, e.g. `cytu.be`.
    pub domain: String,
    pub channel: String,
    pub channel_password: Option<String>,
    /// Account name. `None` joins as an anonymous viewer.
    pub user: Option<String>,
    pub password: Option<String>,

    /// How long an action waits for its acknowledgment.
    pub response_timeout: Duration,
    /// Wait before reconnecting after a transport failure. `None` fails fast.
    pub restart_delay: Option<Duration>,
    /// Extra connect attempts after the first one fails.
    pub connect_retry: u32,
    pub connect_retry_delay: Duration,

    /// Inbound event buffer size. 0 is unbounded.
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,

    pub outbound_interval: Duration,
    /// Messages fetched per outbound cycle.
    pub outbound_limit: usize,
    /// Attempts before an outbound message is marked permanently failed.
    pub outbound_max_retries: u32,

    pub status_interval: Duration,
    pub history_interval: Duration,
    pub maintenance_interval: Duration,
    /// Age after which history rows and delivered messages are pruned.
    pub history_retention: Duration,

    pub transport: TransportConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            channel: String::new(),
            channel_password: None,
            user: None,
            password: None,
            response_timeout: Duration::from_secs(10),
            restart_delay: Some(Duration::from_secs(5)),
            connect_retry: 3,
            connect_retry_delay: Duration::from_secs(1),
            queue_capacity: 1024,
            queue_policy: QueuePolicy::DropOldest,
            outbound_interval: Duration::from_secs(5),
            outbound_limit: 20,
            outbound_max_retries: 3,
            status_interval: Duration::from_secs(30),
            history_interval: Duration::from_secs(300),
            maintenance_interval: Duration::from_secs(3600),
            history_retention: Duration::from_secs(30 * 24 * 3600),
            transport: TransportConfig::default(),
        }
    }
}

impl BotConfig {
    /// Creates a configuration for a channel on a site.
    pub fn new(domain: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Builder: log in with an account.
    pub fn with_user(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    pub fn with_channel_password(mut self, password: impl Into<String>) -> Self {
        self.channel_password = Some(password.into());
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Builder: set the reconnect delay, or disable reconnecting with `None`.
    pub fn with_restart_delay(mut self, delay: Option<Duration>) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_connect_retry(mut self, retry: u32, delay: Duration) -> Self {
        self.connect_retry = retry;
        self.connect_retry_delay = delay;
        self
    }

    pub fn with_queue(mut self, capacity: usize, policy: QueuePolicy) -> Self {
        self.queue_capacity = capacity;
        self.queue_policy = policy;
        self
    }

    pub fn with_outbound(mut self, interval: Duration, limit: usize, max_retries: u32) -> Self {
        self.outbound_interval = interval;
        self.outbound_limit = limit;
        self.outbound_max_retries = max_retries;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Checks values that would make the bot misbehave rather than fail.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.domain.trim().is_empty() {
            return Err(BotError::Config("domain is empty".into()));
        }
        if self.channel.trim().is_empty() {
            return Err(BotError::Config("channel is empty".into()));
        }
        if self.response_timeout.is_zero() {
            return Err(BotError::Config("response timeout must be positive".into()));
        }
        if self.outbound_max_retries == 0 {
            return Err(BotError::Config("outbound max retries must be at least 1".into()));
        }
        for (name, interval) in [
            ("outbound", self.outbound_interval),
            ("status", self.status_interval),
            ("history", self.history_interval),
            ("maintenance", self.maintenance_interval),
        ] {
            if interval.is_zero() {
                return Err(BotError::Config(format!("{name} interval must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BotConfig::new("cytu.be", "lobby");
        assert_eq!(config.response_timeout, Duration::from_secs(10));
        assert_eq!(config.restart_delay, Some(Duration::from_secs(5)));
        assert_eq!(config.connect_retry, 3);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.queue_policy, QueuePolicy::DropOldest);
        assert_eq!(config.outbound_limit, 20);
        assert_eq!(config.outbound_max_retries, 3);
        assert!(config.user.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders() {
        let config = BotConfig::new("cytu.be", "lobby")
            .with_user("bot", Some("hunter2".into()))
            .with_channel_password("secret")
            .with_restart_delay(None)
            .with_connect_retry(0, Duration::from_millis(10))
            .with_queue(0, QueuePolicy::Block)
            .with_outbound(Duration::from_secs(1), 5, 2);

        assert_eq!(config.user.as_deref(), Some("bot"));
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.channel_password.as_deref(), Some("secret"));
        assert!(config.restart_delay.is_none());
        assert_eq!(config.connect_retry, 0);
        assert_eq!(config.queue_policy, QueuePolicy::Block);
        assert_eq!(config.outbound_max_retries, 2);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(BotConfig::new("", "lobby").validate().is_err());
        assert!(BotConfig::new("cytu.be", " ").validate().is_err());
        let config = BotConfig::new("cytu.be", "lobby").with_outbound(Duration::ZERO, 20, 3);
        assert!(config.validate().is_err());
        let config = BotConfig::new("cytu.be", "lobby").with_outbound(Duration::from_secs(1), 20, 0);
        assert!(config.validate().is_err());
    }

    mod proxy {
        use super::*;

        #[test]
        fn parses_host_and_port() {
            let proxy = ProxyConfig::parse("127.0.0.1:9050").unwrap();
            assert_eq!(proxy.host, "127.0.0.1");
            assert_eq!(proxy.port, 9050);
            assert!(proxy.remote_dns);
            assert_eq!(proxy.url(), "socks5h://127.0.0.1:9050");
        }

        #[test]
        fn default_port() {
            let proxy = ProxyConfig::parse("proxy.local").unwrap();
            assert_eq!(proxy.port, DEFAULT_PROXY_PORT);
            assert_eq!(proxy.with_local_dns().url(), "socks5://proxy.local:1080");
        }

        #[test]
        fn rejects_bad_addresses() {
            assert!(matches!(
                ProxyConfig::parse("host:notaport"),
                Err(BotError::ProxyConfig(_))
            ));
            assert!(ProxyConfig::parse(":1080").is_err());
            assert!(ProxyConfig::parse("").is_err());
        }
    }
}
