//! Async REST client for the room directory and transcript upload.

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Seconds a transcript line lasts when the recogniser gave no end time.
const DEFAULT_LINE_SECS: f64 = 5.0;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRoom {
    pub room_id: String,
    pub meeting_code: String,
    pub password: String,
    pub join_link: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinedRoom {
    pub room_id: String,
    pub meeting_code: String,
    pub title: String,
    pub host_name: String,
    pub participant_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub meeting_code: String,
    pub title: String,
    pub host_name: String,
    /// Only present for the host.
    #[serde(default)]
    pub password: Option<String>,
    pub join_link: String,
    pub active_participants: usize,
}

/// One recognised line of speech, in meeting-relative seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
}

impl TranscriptEntry {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, start_time: f64) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            start_time,
            end_time: start_time + DEFAULT_LINE_SECS,
            confidence: 1.0,
        }
    }

    pub fn ending_at(mut self, end_time: f64) -> Self {
        self.end_time = end_time;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedTranscript {
    pub meeting_id: String,
    pub subtitle_count: usize,
    #[serde(default)]
    pub analysis_status: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| ClientError::Api {
                            status: 0,
                            message: e.to_string(),
                        })?,
                );
                h
            })
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(&config.token, &config.api_url)
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    // ── Rooms ─────────────────────────────────────────────────────────────────

    pub async fn create_room(&self, title: Option<&str>) -> Result<CreatedRoom> {
        let body = match title {
            Some(title) => json!({ "title": title }),
            None => json!({}),
        };
        self.request(Method::POST, "/rooms", Some(&body)).await
    }

    pub async fn join_room(&self, meeting_code: &str, password: &str) -> Result<JoinedRoom> {
        let body = json!({ "meeting_code": meeting_code, "password": password });
        self.request(Method::POST, "/rooms/join", Some(&body)).await
    }

    pub async fn room_info(&self, room_id: &str) -> Result<RoomInfo> {
        self.request(Method::GET, &format!("/rooms/{room_id}/info"), None)
            .await
    }

    // ── Transcripts ───────────────────────────────────────────────────────────

    /// Upload a finished meeting's transcript, entries in speaking order.
    pub async fn save_transcript(
        &self,
        room_id: &str,
        title: &str,
        entries: &[TranscriptEntry],
        auto_analyze: bool,
    ) -> Result<SavedTranscript> {
        let body = json!({
            "title": title,
            "transcript": entries,
            "auto_analyze": auto_analyze,
        });
        self.request(
            Method::POST,
            &format!("/rooms/{room_id}/transcript"),
            Some(&body),
        )
        .await
    }
}
