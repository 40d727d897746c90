//! REST routes served next to the signaling WebSocket.

pub mod health;
pub mod rooms;
