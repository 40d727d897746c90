//! # huddle-relay
//!
//! Signaling relay for mesh meetings. Provides:
//! - A small room directory (meeting codes, passwords, host metadata) over REST
//! - One signaling WebSocket per participant, scoped to a room
//! - One serialized actor per room holding the authoritative room state
//!
//! Media never touches the relay; it only forwards negotiation metadata between peers
//! and fans out room events.

pub mod directory;
pub mod middleware;
pub mod room;
pub mod routes;
pub mod ws;

use axum::{routing::get, Router};
use directory::RoomDirectory;
use huddle_common::config::AppConfig;
use room::RoomManager;
use std::sync::Arc;
use std::time::Instant;

/// Shared relay state available to all handlers.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<AppConfig>,
    pub directory: RoomDirectory,
    pub rooms: RoomManager,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let directory = RoomDirectory::new();
        Self {
            rooms: RoomManager::new(config.clone()).with_directory(directory.clone()),
            directory,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Build the relay router: REST directory, health and the signaling WebSocket.
pub fn build_router(state: RelayState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(routes::rooms::router(state.clone()))
        .merge(routes::health::router())
        .route("/rooms/{room_id}/ws", get(ws::ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use huddle_common::auth::issue_token;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "relay-test-secret";

    fn app() -> Router {
        build_router(RelayState::new(AppConfig::with_secret(SECRET).unwrap()))
    }

    fn bearer(user_id: Uuid, name: &str) -> String {
        format!("Bearer {}", issue_token(user_id, name, SECRET, 300).unwrap())
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let (status, body) = call(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn directory_requires_bearer_token() {
        let app = app();
        let (status, body) = call(&app, post("/rooms", None, json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn create_join_and_info_flow() {
        let app = app();
        let host = Uuid::new_v4();
        let host_auth = bearer(host, "Ada");
        let guest_auth = bearer(Uuid::new_v4(), "Bob");

        let (status, created) =
            call(&app, post("/rooms", Some(&host_auth), json!({"title": "Standup"}))).await;
        assert_eq!(status, StatusCode::OK);
        let room_id = created["room_id"].as_str().unwrap().to_owned();
        let code = created["meeting_code"].as_str().unwrap().to_owned();
        let password = created["password"].as_str().unwrap().to_owned();
        assert_eq!(room_id.len(), 8);

        let (status, joined) = call(
            &app,
            post(
                "/rooms/join",
                Some(&guest_auth),
                json!({"meeting_code": code.to_uppercase(), "password": password}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["room_id"], room_id.as_str());
        assert_eq!(joined["host_name"], "Ada");
        assert_eq!(joined["participant_count"], 0);

        let (status, _) = call(
            &app,
            post(
                "/rooms/join",
                Some(&guest_auth),
                json!({"meeting_code": code, "password": "wrong"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let info = |auth: String| {
            Request::get(format!("/rooms/{room_id}/info"))
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap()
        };
        let (_, as_host) = call(&app, info(host_auth.clone())).await;
        assert_eq!(as_host["password"], password.as_str());
        let (_, as_guest) = call(&app, info(guest_auth.clone())).await;
        assert!(as_guest.get("password").is_none());
        assert_eq!(as_guest["title"], "Standup");
    }

    #[tokio::test]
    async fn unknown_room_info_is_a_placeholder() {
        let app = app();
        let req = Request::get("/rooms/nope1234/info")
            .header(header::AUTHORIZATION, bearer(Uuid::new_v4(), "Ada"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meeting_code"], "");
        assert_eq!(body["active_participants"], 0);
    }
}
