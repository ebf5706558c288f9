//! Client configuration.
//!
//! All settings live in a single file, `~/.config/juiced/config.toml` by
//! default. A path ending in `.json` is read as JSON instead.
//!
//! `password` and `channel_password` support secret references, see
//! [`crate::secret`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use juiced_bot::{BotConfig, ProxyConfig, QueuePolicy, TransportConfig};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{ClientError, ClientResult};
use crate::secret;

/// Configuration for the juiced client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Site hosting the channel.
    pub domain: String,
    pub channel: String,
    /// Channel password (supports `pass::` and `env::` prefixes).
    pub channel_password: Option<String>,

    /// Account name. Leave unset to join anonymously.
    pub user: Option<String>,
    /// Account password (supports `pass::` and `env::` prefixes).
    pub password: Option<String>,

    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,

    /// SOCKS5 proxy as `host[:port]`.
    pub proxy: Option<String>,
    /// Let the proxy resolve hostnames.
    pub proxy_remote_dns: bool,

    /// SQLite database for the outbound queue, presence and history.
    /// Unset disables them.
    pub database: Option<PathBuf>,

    /// Connection settings.
    pub connection: ConnectionSettings,

    /// Background task settings.
    pub tasks: TaskSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            domain: "cytu.be".to_string(),
            channel: String::new(),
            channel_password: None,
            user: None,
            password: None,
            log_level: "info".to_string(),
            proxy: None,
            proxy_remote_dns: true,
            database: None,
            connection: ConnectionSettings::default(),
            tasks: TaskSettings::default(),
        }
    }
}

/// Connection settings. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub response_timeout: f64,
    /// Delay before reconnecting. Negative disables reconnecting.
    pub restart_delay: f64,
    pub connect_retry: u32,
    pub connect_retry_delay: f64,
    /// Inbound event buffer size, 0 for unbounded.
    pub queue_capacity: usize,
    /// Apply backpressure instead of dropping the oldest event when full.
    pub queue_block: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let defaults = BotConfig::default();
        Self {
            response_timeout: defaults.response_timeout.as_secs_f64(),
            restart_delay: defaults.restart_delay.map_or(-1.0, |d| d.as_secs_f64()),
            connect_retry: defaults.connect_retry,
            connect_retry_delay: defaults.connect_retry_delay.as_secs_f64(),
            queue_capacity: defaults.queue_capacity,
            queue_block: false,
        }
    }
}

/// Background task settings. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub outbound_interval: f64,
    pub outbound_limit: usize,
    pub outbound_max_retries: u32,
    pub status_interval: f64,
    pub history_interval: f64,
    pub maintenance_interval: f64,
    pub history_retention_days: u32,
}

impl Default for TaskSettings {
    fn default() -> Self {
        let defaults = BotConfig::default();
        Self {
            outbound_interval: defaults.outbound_interval.as_secs_f64(),
            outbound_limit: defaults.outbound_limit,
            outbound_max_retries: defaults.outbound_max_retries,
            status_interval: defaults.status_interval.as_secs_f64(),
            history_interval: defaults.history_interval.as_secs_f64(),
            maintenance_interval: defaults.maintenance_interval.as_secs_f64(),
            history_retention_days: 30,
        }
    }
}

fn seconds(name: &str, value: f64) -> ClientResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ClientError::Config(format!("{name} must be a non-negative number of seconds")))
}

impl ClientConfig {
    /// Loads configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> ClientResult<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            toml::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| ClientError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Applies command-line overrides.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(domain) = &cli.domain {
            self.domain = domain.clone();
        }
        if let Some(channel) = &cli.channel {
            self.channel = channel.clone();
        }
        if let Some(user) = &cli.user {
            self.user = Some(user.clone());
        }
        if let Some(proxy) = &cli.proxy {
            self.proxy = Some(proxy.clone());
        }
        if let Some(database) = &cli.database {
            self.database = Some(database.clone());
        }
    }

    /// The parsed proxy, if one is configured.
    pub fn proxy_config(&self) -> ClientResult<Option<ProxyConfig>> {
        let Some(address) = self.proxy.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };
        let proxy = ProxyConfig::parse(address)?;
        Ok(Some(if self.proxy_remote_dns {
            proxy
        } else {
            proxy.with_local_dns()
        }))
    }

    /// Builds the bot configuration, resolving secret references.
    pub fn to_bot_config(&self) -> ClientResult<BotConfig> {
        let conn = &self.connection;
        let tasks = &self.tasks;

        let restart_delay = if conn.restart_delay < 0.0 {
            None
        } else {
            Some(seconds("restart_delay", conn.restart_delay)?)
        };
        let policy = if conn.queue_block {
            QueuePolicy::Block
        } else {
            QueuePolicy::DropOldest
        };
        let mut transport = TransportConfig::default();
        if let Some(proxy) = self.proxy_config()? {
            transport = transport.with_proxy(proxy);
        }

        let mut config = BotConfig::new(&self.domain, &self.channel)
            .with_response_timeout(seconds("response_timeout", conn.response_timeout)?)
            .with_restart_delay(restart_delay)
            .with_connect_retry(
                conn.connect_retry,
                seconds("connect_retry_delay", conn.connect_retry_delay)?,
            )
            .with_queue(conn.queue_capacity, policy)
            .with_outbound(
                seconds("outbound_interval", tasks.outbound_interval)?,
                tasks.outbound_limit,
                tasks.outbound_max_retries,
            )
            .with_transport(transport);
        config.status_interval = seconds("status_interval", tasks.status_interval)?;
        config.history_interval = seconds("history_interval", tasks.history_interval)?;
        config.maintenance_interval = seconds("maintenance_interval", tasks.maintenance_interval)?;
        config.history_retention = Duration::from_secs(u64::from(tasks.history_retention_days) * 86_400);

        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            let password = secret::resolve_setting("password", self.password.as_deref())?;
            config = config.with_user(user, password);
        }
        if let Some(password) =
            secret::resolve_setting("channel_password", self.channel_password.as_deref())?
        {
            config = config.with_channel_password(password);
        }

        config.validate()?;
        Ok(config)
    }

    /// The database path, or an error naming the setting.
    pub fn require_database(&self) -> ClientResult<&Path> {
        self.database.as_deref().ok_or_else(|| {
            ClientError::Config(format!(
                "no database configured; set `database` in {}",
                Self::default_path().display()
            ))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("juiced")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("juiced")
    }
}
