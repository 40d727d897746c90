//! # Huddle Server
//!
//! Runs the signaling relay: the room directory REST API and the per-room signaling
//! WebSocket, in one process. Media flows peer to peer and never reaches this binary.

use std::net::SocketAddr;

use clap::Parser;
use huddle_common::config::AppConfig;
use huddle_relay::{build_router, RelayState};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Parser)]
#[command(name = "huddle", version, about = "Mesh meeting signaling relay")]
struct Cli {
    /// Address to bind, overriding HUDDLE__SERVER__HOST.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding HUDDLE__SERVER__PORT.
    #[arg(long, short)]
    port: Option<u16>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = huddle_common::config::load()?;
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    if config.auth.jwt_secret.is_empty() {
        anyhow::bail!("HUDDLE__AUTH__JWT_SECRET must be set");
    }

    tracing::info!("Starting Huddle relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        grace_ms = config.relay.reconnect_grace_ms,
        max_participants = config.limits.max_participants_per_room,
        "Relay settings"
    );

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    let app = build_router(RelayState::new(config))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Relay listening on http://{addr} (signaling at ws://{addr}/rooms/{{room_id}}/ws)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_loaded_values() {
        let mut config = AppConfig::with_secret("s").unwrap();
        Cli::try_parse_from(["huddle", "--host", "127.0.0.1", "-p", "9000"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);

        let mut untouched = AppConfig::with_secret("s").unwrap();
        Cli::try_parse_from(["huddle"]).unwrap().apply(&mut untouched);
        assert_eq!(untouched.server.port, 8090);
    }
}
