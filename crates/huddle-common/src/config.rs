//! Relay configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::time::Duration;

/// Load the relay configuration from `.env`, an optional `config` file and
/// `HUDDLE__*` environment variables, over the built-in defaults.
pub fn load() -> Result<AppConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let cfg = defaults()?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (HUDDLE__SERVER__PORT, HUDDLE__AUTH__JWT_SECRET, etc.)
        .add_source(
            config::Environment::with_prefix("HUDDLE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8090)?
        .set_default("server.public_url", "http://localhost:8090")?
        .set_default("relay.reconnect_grace_ms", 5_000)?
        .set_default("relay.room_queue_capacity", 256)?
        .set_default("relay.outbound_buffer", 128)?
        .set_default("relay.idle_timeout_ms", 45_000)?
        .set_default("limits.max_adhoc_rooms", 1_000)?
        .set_default("limits.max_participants_per_room", 16)?
        .set_default("limits.max_chat_history", 500)?
        .set_default("limits.max_message_length", 4000)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Built-in defaults only, with the given signing secret. Used by tooling and tests
    /// that run a relay without touching the process environment.
    pub fn with_secret(jwt_secret: &str) -> Result<Self, ConfigError> {
        defaults()?
            .set_override("auth.jwt_secret", jwt_secret)?
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL used when building join links handed back by the REST API.
    pub public_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret (HS256), at least 256 bits of entropy
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// How long a dropped participant keeps their seat before `user-left` is broadcast.
    pub reconnect_grace_ms: u64,
    /// Capacity of each room actor's command queue.
    pub room_queue_capacity: usize,
    /// Per-connection buffer of envelopes waiting to be written to the socket.
    pub outbound_buffer: usize,
    /// A socket that sends nothing (not even a ping) for this long is treated as
    /// dropped. Clients ping well within it.
    pub idle_timeout_ms: u64,
}

impl RelayConfig {
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_participants_per_room: usize,
    pub max_chat_history: usize,
    pub max_message_length: usize,
    /// Rooms registered implicitly by a WebSocket naming an unknown room id.
    pub max_adhoc_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let cfg = AppConfig::with_secret("s3cret").unwrap();
        assert_eq!(cfg.auth.jwt_secret, "s3cret");
        assert_eq!(cfg.server.port, 8090);
        assert_eq!(cfg.relay.reconnect_grace(), Duration::from_secs(5));
        assert_eq!(cfg.limits.max_chat_history, 500);
        assert_eq!(cfg.relay.idle_timeout(), Duration::from_secs(45));
        assert_eq!(cfg.limits.max_adhoc_rooms, 1_000);
    }
}
