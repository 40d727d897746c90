//! # huddle-client
//!
//! Client session core for mesh meetings: a resilient signaling transport, one
//! negotiated peer link per remote participant, a local mirror of the room and the
//! local media lifecycle.
//!
//! ```no_run
//! use huddle_client::{ClientConfig, Session, SessionEvent};
//!
//! # async fn run() -> huddle_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let (session, mut events) = Session::join_with_webrtc(&config, "room-id")?;
//! session.set_mic(true).await?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Ended(reason) = event {
//!         println!("left: {reason:?}");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod room;
pub mod router;
pub mod rtc;
pub mod session;
pub mod transport;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::{EndReason, Session, SessionEvent};
