//! Client configuration.
//!
//! Loaded from `HUDDLE_CLIENT__*` environment variables (and `.env`), or built in code
//! with [`ClientConfig::new`].

use config::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Result};
use crate::transport::Timing;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base WebSocket URL of the relay, e.g. `ws://localhost:8090`.
    pub relay_url: String,
    /// Base HTTP URL of the room directory API.
    pub api_url: String,
    /// Bearer token identifying the local participant.
    #[serde(default)]
    pub token: String,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    /// Bound on offer/answer and ICE recovery before a link is declared failed.
    pub negotiation_timeout_ms: u64,
    /// How often the client pings the relay.
    pub heartbeat_interval_ms: u64,
    /// Silence from the relay after which the socket is treated as dropped.
    pub heartbeat_timeout_ms: u64,
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            api_url: api_url.into(),
            token: token.into(),
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 10_000,
            negotiation_timeout_ms: 15_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }

    /// Load from `HUDDLE_CLIENT__RELAY_URL`, `HUDDLE_CLIENT__TOKEN`, ... over the defaults.
    /// `HUDDLE_CLIENT__ICE_SERVERS` is a comma-separated list.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        config::Config::builder()
            .set_default("relay_url", "ws://localhost:8090")?
            .set_default("api_url", "http://localhost:8090")?
            .set_default("reconnect_base_ms", 1_000)?
            .set_default("reconnect_cap_ms", 10_000)?
            .set_default("negotiation_timeout_ms", 15_000)?
            .set_default("heartbeat_interval_ms", 10_000)?
            .set_default("heartbeat_timeout_ms", 30_000)?
            .set_default("ice_servers", vec!["stun:stun.l.google.com:19302"])?
            .add_source(
                config::Environment::with_prefix("HUDDLE_CLIENT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ice_servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn timing(&self) -> Timing {
        Timing {
            reconnect_base: self.reconnect_base(),
            reconnect_cap: self.reconnect_cap(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }

    /// The signaling endpoint for `room_id`, with the room id and token escaped.
    pub fn signaling_url(&self, room_id: &str) -> Result<Url> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: self.relay_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.relay_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(["rooms", room_id, "ws"]);
        url.query_pairs_mut().clear().append_pair("token", &self.token);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_url_carries_room_and_token() {
        let cfg = ClientConfig::new("ws://relay:8090/", "http://relay:8090", "abc.def.ghi");
        assert_eq!(
            cfg.signaling_url("deadbeef").unwrap().as_str(),
            "ws://relay:8090/rooms/deadbeef/ws?token=abc.def.ghi"
        );
        assert_eq!(cfg.reconnect_base(), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_cap(), Duration::from_secs(10));
        assert_eq!(cfg.timing().heartbeat_timeout, Duration::from_secs(30));
    }

    #[test]
    fn signaling_url_escapes_room_and_token() {
        let cfg = ClientConfig::new("wss://relay.example/base", "https://relay.example", "a+b&c=d");
        let url = cfg.signaling_url("team room/1?x").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://relay.example/base/rooms/team%20room%2F1%3Fx/ws?token=a%2Bb%26c%3Dd"
        );
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments, vec!["base", "rooms", "team%20room%2F1%3Fx", "ws"]);
        let token: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(token, vec![("token".to_owned(), "a+b&c=d".to_owned())]);
    }

    #[test]
    fn signaling_url_rejects_garbage_base() {
        let cfg = ClientConfig::new("not a url", "http://relay", "t");
        assert!(matches!(cfg.signaling_url("r"), Err(ClientError::InvalidUrl { .. })));
    }
}
