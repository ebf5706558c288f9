//! Server discovery documents.

use serde::Deserialize;

use crate::error::{ProtocolError, ProtocolResult};

/// One entry of `/socketconfig/<channel>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerEntry {
    pub url: String,
    #[serde(default)]
    pub secure: bool,
}

impl ServerEntry {
    /// The Socket.IO endpoint on this server.
    pub fn endpoint(&self) -> String {
        format!("{}/socket.io/", self.url.trim_end_matches('/'))
    }
}

/// The socket config document listing the servers that host a channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SocketConfig {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl SocketConfig {
    pub fn parse(body: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// The first secure server, else the first server.
    pub fn pick(&self) -> ProtocolResult<&ServerEntry> {
        self.servers
            .iter()
            .find(|s| s.secure)
            .or_else(|| self.servers.first())
            .ok_or(ProtocolError::NoServers)
    }
}

/// `https://<domain>/socketconfig/<channel>.json`
pub fn socket_config_url(domain: &str, channel: &str) -> String {
    let domain = domain.trim_end_matches('/');
    let channel = urlencoding::encode(channel);
    if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{domain}/socketconfig/{channel}.json")
    } else {
        format!("https://{domain}/socketconfig/{channel}.json")
    }
}
