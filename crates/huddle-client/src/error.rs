//! Error types for the Huddle client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// An error from the signaling WebSocket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST API answered with a non-2xx status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// An error from the platform peer-connection stack.
    #[error("WebRTC error: {0}")]
    Rtc(#[from] webrtc::Error),

    /// Offer/answer exchange could not proceed.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// A local capture device could not be opened.
    #[error("Device unavailable: {0}")]
    Device(String),

    /// The relay URL could not be turned into a signaling endpoint.
    #[error("Invalid relay URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The session was already torn down.
    #[error("Session is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
