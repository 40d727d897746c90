//! Signaling WebSocket: one task pair per connected participant.
//!
//! The connection is scoped to one room and one identity, both fixed at upgrade time.
//! Envelopes read from the socket are posted to the room actor; everything the room
//! wants this participant to see arrives on the connection's outbound queue.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use huddle_common::auth::{self, Identity};
use huddle_common::error::HuddleError;
use huddle_common::protocol::Envelope;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::room::{Outbound, RoomCommand};
use crate::RelayState;

/// Normal closure; anything else keeps the seat for the reconnect grace period.
const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /rooms/{room_id}/ws?token=<jwt>: WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state, room_id, params.token))
}

fn authenticate(state: &RelayState, token: Option<&str>) -> Result<Identity, HuddleError> {
    let token = token.ok_or(HuddleError::Unauthorized)?;
    auth::identify(token, &state.config.auth.jwt_secret)
}

/// Close the socket with the error's close code. 44xx codes tell the client not to retry.
async fn reject(mut socket: WebSocket, room_id: &str, err: &HuddleError) {
    tracing::warn!(room = %room_id, code = err.close_code(), "Rejected signaling connection: {err}");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: err.close_code(),
            reason: err.to_string().into(),
        })))
        .await;
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    socket: WebSocket,
    state: Arc<RelayState>,
    room_id: String,
    token: Option<String>,
) {
    let identity = match authenticate(&state, token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => return reject(socket, &room_id, &e).await,
    };
    let user_id = identity.user_id;

    // Unknown room ids get a minimal record hosted by whoever connects first.
    let record = match state
        .directory
        .ensure_room(&room_id, &identity, state.config.limits.max_adhoc_rooms)
        .await
    {
        Ok(record) => record,
        Err(e) => return reject(socket, &room_id, &e).await,
    };

    let conn_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<Outbound>(state.config.relay.outbound_buffer);

    let room = match state
        .rooms
        .join(&room_id, Some(record.host_user_id), identity, conn_id, outbound_tx)
        .await
    {
        Ok(room) => room,
        Err(e) => return reject(socket, &room_id, &e).await,
    };

    let (mut sender, mut receiver) = socket.split();

    // ── Sender task ──────────────────────────────────────────────────────────
    // Drains the outbound queue onto the socket. Ends when the room drops our
    // seat (queue closed), asks us to close, or the socket fails.
    let log_room = room_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Envelope(envelope) => {
                    let text = match envelope.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(room = %log_room, "Failed to encode envelope: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // ── Receive loop ─────────────────────────────────────────────────────────
    let idle_timeout = state.config.relay.idle_timeout();
    let mut deliberate = false;
    loop {
        tokio::select! {
            msg = tokio::time::timeout(idle_timeout, receiver.next()) => match msg {
                Err(_) => {
                    tracing::info!(room = %room_id, user = %user_id, "Socket idle, holding seat for reconnect");
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => match Envelope::decode(text.as_str()) {
                    Ok(Envelope::Unknown) => {
                        tracing::debug!(room = %room_id, user = %user_id, "Ignoring unknown envelope type");
                    }
                    Ok(envelope) => {
                        let cmd = RoomCommand::Inbound { user_id, conn_id, envelope };
                        if !room.send(cmd).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(room = %room_id, user = %user_id, "Malformed envelope: {e}");
                    }
                },
                Ok(Some(Ok(Message::Close(frame)))) => {
                    deliberate = frame.is_some_and(|f| f.code == CLOSE_NORMAL);
                    break;
                }
                // Ping/pong are answered by axum; binary frames are not part of the protocol.
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    tracing::debug!(room = %room_id, user = %user_id, "Socket error: {e}");
                    break;
                }
                Ok(None) => break,
            },
            _ = &mut send_task => break,
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────
    send_task.abort();
    let cmd = if deliberate {
        RoomCommand::Leave { user_id, conn_id }
    } else {
        RoomCommand::Disconnected { user_id, conn_id }
    };
    room.send(cmd).await;

    tracing::info!(room = %room_id, user = %user_id, deliberate, "Signaling connection closed");
}
