//! REST client against the relay's room directory.

use axum::{extract::Path, routing::post, Json, Router};
use huddle_client::api::TranscriptEntry;
use huddle_client::{ApiClient, ClientError};
use huddle_common::auth::issue_token;
use huddle_common::config::AppConfig;
use huddle_relay::{build_router, RelayState};
use serde_json::{json, Value};
use uuid::Uuid;

const SECRET: &str = "api-test-secret";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn client(base: &str, name: &str) -> (Uuid, ApiClient) {
    let user = Uuid::new_v4();
    let token = issue_token(user, name, SECRET, 300).unwrap();
    (user, ApiClient::new(&token, base).unwrap())
}

#[tokio::test]
async fn create_join_and_inspect_a_room() {
    let base = serve(build_router(RelayState::new(AppConfig::with_secret(SECRET).unwrap()))).await;
    let (_, host) = client(&base, "Ada");
    let (_, guest) = client(&base, "Bob");

    let created = host.create_room(Some("Standup")).await.unwrap();
    assert_eq!(created.title, "Standup");
    assert!(created.join_link.ends_with(&format!("/rooms/{}", created.room_id)));

    let joined = guest
        .join_room(&created.meeting_code, &created.password)
        .await
        .unwrap();
    assert_eq!(joined.room_id, created.room_id);
    assert_eq!(joined.host_name, "Ada");

    let err = guest
        .join_room(&created.meeting_code, "wrong-password")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 403, .. }));

    let as_host = host.room_info(&created.room_id).await.unwrap();
    assert_eq!(as_host.password.as_deref(), Some(created.password.as_str()));
    let as_guest = guest.room_info(&created.room_id).await.unwrap();
    assert_eq!(as_guest.password, None);
    assert_eq!(as_guest.active_participants, 0);
}

#[tokio::test]
async fn invalid_token_is_an_api_error() {
    let base = serve(build_router(RelayState::new(AppConfig::with_secret(SECRET).unwrap()))).await;
    let anonymous = ApiClient::new("garbage", &base).unwrap();
    let err = anonymous.create_room(None).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 401, .. }));
}

#[tokio::test]
async fn transcript_upload_sends_entries_in_order() {
    let app = Router::new().route(
        "/rooms/{room_id}/transcript",
        post(|Path(room_id): Path<String>, Json(body): Json<Value>| async move {
            let lines = body["transcript"].as_array().cloned().unwrap_or_default();
            let texts: Vec<&str> = lines.iter().filter_map(|l| l["text"].as_str()).collect();
            assert_eq!(texts, ["good morning", "morning"]);
            assert_eq!(lines[0]["end_time"], json!(5.0));
            Json(json!({
                "meeting_id": format!("m-{room_id}"),
                "subtitle_count": lines.len(),
                "analysis_status": if body["auto_analyze"] == json!(true) { "queued" } else { "skipped" },
            }))
        }),
    );
    let base = serve(app).await;
    let (_, api) = client(&base, "Ada");

    let entries = [
        TranscriptEntry::new("Ada", "good morning", 0.0),
        TranscriptEntry::new("Bob", "morning", 5.5).ending_at(6.5),
    ];
    let saved = api
        .save_transcript("r1", "Standup", &entries, true)
        .await
        .unwrap();
    assert_eq!(saved.meeting_id, "m-r1");
    assert_eq!(saved.subtitle_count, 2);
    assert_eq!(saved.analysis_status.as_deref(), Some("queued"));
}
