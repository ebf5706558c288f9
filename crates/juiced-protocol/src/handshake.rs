//! Polling handshake and websocket URL construction.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ProtocolError, ProtocolResult};

/// Used when the server omits a keepalive field.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);
/// Lower bound for both keepalive fields.
pub const MIN_KEEPALIVE: Duration = Duration::from_secs(1);

/// Session parameters returned by the polling handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub sid: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHandshake {
    #[serde(default)]
    sid: String,
    ping_interval: Option<u64>,
    ping_timeout: Option<u64>,
}

fn keepalive(millis: Option<u64>) -> Duration {
    millis
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_KEEPALIVE)
        .max(MIN_KEEPALIVE)
}

impl Handshake {
    /// Parses a handshake response body. A body without a session id is
    /// rejected.
    ///
    /// Polling responses may carry a length or junk prefix before the JSON
    /// object; parsing starts at the first `{` and stops after the first object.
    pub fn parse(body: &str) -> ProtocolResult<Self> {
        let start = body.find('{').ok_or(ProtocolError::MissingHandshake)?;
        let raw: RawHandshake = serde_json::Deserializer::from_str(&body[start..])
            .into_iter::<RawHandshake>()
            .next()
            .ok_or(ProtocolError::MissingHandshake)??;
        if raw.sid.trim().is_empty() {
            return Err(ProtocolError::MissingHandshake);
        }
        Ok(Self {
            sid: raw.sid,
            ping_interval: keepalive(raw.ping_interval),
            ping_timeout: keepalive(raw.ping_timeout),
        })
    }

    /// How long the connection may stay silent before it is considered dead.
    pub fn liveness_deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

fn parse_url(url: &str) -> ProtocolResult<Url> {
    Url::parse(url).map_err(|e| ProtocolError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// `<endpoint>?EIO=4&transport=polling`
pub fn handshake_url(endpoint: &str) -> ProtocolResult<String> {
    let mut url = parse_url(endpoint)?;
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "polling");
    Ok(url.into())
}

/// The websocket upgrade URL for a session: `ws(s)://...?EIO=4&transport=websocket&sid=<sid>`.
pub fn websocket_url(endpoint: &str, sid: &str) -> ProtocolResult<String> {
    let mut url = parse_url(endpoint)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let ws = format!("{scheme}{}", &url.as_str()[url.scheme().len()..]);
    url = parse_url(&ws)?;
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket")
        .append_pair("sid", sid);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_body() {
        let hs = Handshake::parse(r#"{"sid":"S","pingInterval":25000,"pingTimeout":20000}"#)
            .unwrap();
        assert_eq!(hs.sid, "S");
        assert_eq!(hs.ping_interval, Duration::from_secs(25));
        assert_eq!(hs.ping_timeout, Duration::from_secs(20));
        assert_eq!(hs.liveness_deadline(), Duration::from_secs(45));
    }

    #[test]
    fn skips_junk_prefix_and_trailing_data() {
        let hs = Handshake::parse(
            ")]}\n0{\"sid\":\"S\",\"pingInterval\":1000,\"pingTimeout\":1000,\"upgrades\":[\"websocket\"]}\u{1e}40",
        )
        .unwrap();
        assert_eq!(hs.sid, "S");
        assert_eq!(hs.ping_interval, Duration::from_secs(1));
    }

    #[test]
    fn defaults_and_clamps_keepalive() {
        let hs = Handshake::parse(r#"{"sid":"S","pingInterval":10}"#).unwrap();
        assert_eq!(hs.ping_interval, MIN_KEEPALIVE);
        assert_eq!(hs.ping_timeout, DEFAULT_KEEPALIVE);
    }

    #[test]
    fn rejects_bodies_without_json() {
        assert!(matches!(
            Handshake::parse("nojson"),
            Err(ProtocolError::MissingHandshake)
        ));
        assert!(matches!(
            Handshake::parse("{not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
        assert!(matches!(
            Handshake::parse(r#"{"pingInterval":1000}"#),
            Err(ProtocolError::MissingHandshake)
        ));
        assert!(matches!(
            Handshake::parse(r#"0{"sid":"","pingInterval":1000}"#),
            Err(ProtocolError::MissingHandshake)
        ));
    }

    #[test]
    fn builds_urls() {
        assert_eq!(
            handshake_url("https://sync.example.com:8443/socket.io/").unwrap(),
            "https://sync.example.com:8443/socket.io/?EIO=4&transport=polling"
        );
        assert_eq!(
            websocket_url("https://sync.example.com:8443/socket.io/", "S1").unwrap(),
            "wss://sync.example.com:8443/socket.io/?EIO=4&transport=websocket&sid=S1"
        );
        assert_eq!(
            websocket_url("http://127.0.0.1:1337/socket.io/", "S1").unwrap(),
            "ws://127.0.0.1:1337/socket.io/?EIO=4&transport=websocket&sid=S1"
        );
        assert!(handshake_url("not a url").is_err());
    }
}
