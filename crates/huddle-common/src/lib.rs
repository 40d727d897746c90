//! # huddle-common
//!
//! Shared models and the wire protocol used by the relay and the client, plus their
//! configuration and error types. Nothing here does I/O.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod protocol;

pub use protocol::Envelope;
