//! Room directory routes.
//!
//! Routes:
//! - POST /rooms: Create a room (caller becomes host)
//! - POST /rooms/join: Resolve a meeting code + password to a room id
//! - GET  /rooms/{room_id}/info: Room metadata (password only for the host)

use axum::{
    extract::{Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use huddle_common::auth::Identity;
use huddle_common::error::{HuddleError, HuddleResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::RelayState;

/// Room directory routes. All of them require a bearer token.
pub fn router(state: Arc<RelayState>) -> Router<Arc<RelayState>> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/{room_id}/info", get(room_info))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth_middleware,
        ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub meeting_code: String,
    pub password: String,
    pub join_link: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    pub meeting_code: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub room_id: String,
    pub meeting_code: String,
    pub title: String,
    pub host_name: String,
    pub participant_count: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomInfoResponse {
    pub room_id: String,
    pub meeting_code: String,
    pub title: String,
    pub host_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub join_link: String,
    pub active_participants: usize,
    pub created_at: DateTime<Utc>,
}

fn join_link(state: &RelayState, room_id: &str) -> String {
    format!(
        "{}/rooms/{room_id}",
        state.config.server.public_url.trim_end_matches('/')
    )
}

/// POST /rooms: Create a room hosted by the caller.
async fn create_room(
    State(state): State<Arc<RelayState>>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateRoomRequest>,
) -> HuddleResult<Json<CreateRoomResponse>> {
    let title = body
        .title
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "New Meeting".into());
    if title.chars().count() > 255 {
        return Err(HuddleError::Validation {
            message: "title must be at most 255 characters".into(),
        });
    }

    let record = state.directory.create(&title, &identity).await;

    Ok(Json(CreateRoomResponse {
        join_link: join_link(&state, &record.room_id),
        room_id: record.room_id,
        meeting_code: record.meeting_code,
        password: record.password_plain,
        title: record.title,
    }))
}

/// POST /rooms/join: Validate a meeting code and password.
async fn join_room(
    State(state): State<Arc<RelayState>>,
    Extension(_identity): Extension<Identity>,
    Json(body): Json<JoinRoomRequest>,
) -> HuddleResult<Json<JoinRoomResponse>> {
    let code_len = body.meeting_code.trim().len();
    if !(5..=20).contains(&code_len) || body.password.is_empty() || body.password.len() > 20 {
        return Err(HuddleError::Validation {
            message: "meeting code and password are required".into(),
        });
    }

    let record = state.directory.join(&body.meeting_code, &body.password).await?;
    let participant_count = state.rooms.participant_count(&record.room_id).await;

    Ok(Json(JoinRoomResponse {
        room_id: record.room_id,
        meeting_code: record.meeting_code,
        title: record.title,
        host_name: record.host_name,
        participant_count,
    }))
}

/// GET /rooms/{room_id}/info: Room metadata.
///
/// Unknown rooms get a placeholder: a participant may follow a link to a room that has
/// not been opened yet.
async fn room_info(
    State(state): State<Arc<RelayState>>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<String>,
) -> HuddleResult<Json<RoomInfoResponse>> {
    let link = join_link(&state, &room_id);
    let active_participants = state.rooms.participant_count(&room_id).await;

    let Some(record) = state.directory.find_by_room(&room_id).await else {
        return Ok(Json(RoomInfoResponse {
            room_id,
            meeting_code: String::new(),
            title: "Meeting".into(),
            host_name: String::new(),
            password: None,
            join_link: link,
            active_participants,
            created_at: Utc::now(),
        }));
    };

    // Only show password to the host
    let password = (record.host_user_id == identity.user_id).then_some(record.password_plain);

    Ok(Json(RoomInfoResponse {
        room_id,
        meeting_code: record.meeting_code,
        title: record.title,
        host_name: record.host_name,
        password,
        join_link: link,
        active_participants,
        created_at: record.created_at,
    }))
}
