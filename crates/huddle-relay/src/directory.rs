//! Room directory: meeting codes, passwords and display metadata.
//!
//! In-memory only. A room created with `POST /rooms` stays until the relay restarts. A
//! room registered by the first WebSocket naming an unknown room id is ad hoc: it is
//! forgotten once its room task shuts down, and only a bounded number may exist at once.
//! Live membership is owned by the room actors in [`crate::room`], not by this registry.

use chrono::{DateTime, Utc};
use huddle_common::auth::Identity;
use huddle_common::error::HuddleError;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Metadata for one registered room.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub room_id: String,
    pub meeting_code: String,
    pub title: String,
    pub password_hash: String,
    /// Kept so the host can look the password up again.
    pub password_plain: String,
    pub host_user_id: Uuid,
    pub host_name: String,
    pub created_at: DateTime<Utc>,
    /// Registered on first connect rather than through the REST API.
    pub adhoc: bool,
}

#[derive(Default)]
struct Registry {
    /// meeting code → record
    by_code: HashMap<String, RoomRecord>,
    /// room id → meeting code
    code_by_room: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct RoomDirectory {
    inner: Arc<RwLock<Registry>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new room hosted by `host`. The record carries the generated password.
    pub async fn create(&self, title: &str, host: &Identity) -> RoomRecord {
        let mut registry = self.inner.write().await;

        let mut meeting_code = generate_meeting_code();
        while registry.by_code.contains_key(&meeting_code) {
            meeting_code = generate_meeting_code();
        }
        let mut room_id = generate_room_id();
        while registry.code_by_room.contains_key(&room_id) {
            room_id = generate_room_id();
        }

        let password = generate_password();
        let record = RoomRecord {
            room_id: room_id.clone(),
            meeting_code: meeting_code.clone(),
            title: title.to_owned(),
            password_hash: hash_password(&password),
            password_plain: password,
            host_user_id: host.user_id,
            host_name: host.display_name.clone(),
            created_at: Utc::now(),
            adhoc: false,
        };

        registry.code_by_room.insert(room_id.clone(), meeting_code.clone());
        registry.by_code.insert(meeting_code.clone(), record.clone());

        tracing::info!(room = %room_id, code = %meeting_code, host = %host.user_id, "Room created");
        record
    }

    /// Validate a meeting code and password. The code is trimmed and lowercased.
    pub async fn join(&self, meeting_code: &str, password: &str) -> Result<RoomRecord, HuddleError> {
        let code = normalize_code(meeting_code);
        let registry = self.inner.read().await;

        let record = registry.by_code.get(&code).ok_or_else(|| HuddleError::NotFound {
            resource: "Meeting".into(),
        })?;

        if hash_password(password) != record.password_hash {
            return Err(HuddleError::InvalidCredentials);
        }
        Ok(record.clone())
    }

    pub async fn find_by_room(&self, room_id: &str) -> Option<RoomRecord> {
        let registry = self.inner.read().await;
        let code = registry.code_by_room.get(room_id)?;
        registry.by_code.get(code).cloned()
    }

    /// Look up `room_id`, registering a minimal ad-hoc room hosted by `host` if it is
    /// unknown. Fails once `max_adhoc` ad-hoc rooms are registered.
    pub async fn ensure_room(
        &self,
        room_id: &str,
        host: &Identity,
        max_adhoc: usize,
    ) -> Result<RoomRecord, HuddleError> {
        if let Some(record) = self.find_by_room(room_id).await {
            return Ok(record);
        }

        let mut registry = self.inner.write().await;
        // Double-check after acquiring write lock
        if let Some(record) = registry
            .code_by_room
            .get(room_id)
            .and_then(|code| registry.by_code.get(code))
        {
            return Ok(record.clone());
        }

        if registry.by_code.values().filter(|r| r.adhoc).count() >= max_adhoc {
            tracing::warn!(room = %room_id, max_adhoc, "Refusing ad-hoc room, limit reached");
            return Err(HuddleError::Validation {
                message: "Too many open meetings, try again later".into(),
            });
        }

        let mut meeting_code = generate_meeting_code();
        while registry.by_code.contains_key(&meeting_code) {
            meeting_code = generate_meeting_code();
        }
        let password = generate_password();
        let record = RoomRecord {
            room_id: room_id.to_owned(),
            meeting_code: meeting_code.clone(),
            title: "Meeting".into(),
            password_hash: hash_password(&password),
            password_plain: password,
            host_user_id: host.user_id,
            host_name: host.display_name.clone(),
            created_at: Utc::now(),
            adhoc: true,
        };
        registry.code_by_room.insert(room_id.to_owned(), meeting_code.clone());
        registry.by_code.insert(meeting_code, record.clone());

        tracing::info!(room = %room_id, host = %host.user_id, "Registered room on first connect");
        Ok(record)
    }

    /// Drop `room_id` if it was registered ad hoc. Rooms created over REST are kept.
    pub async fn forget_adhoc(&self, room_id: &str) -> bool {
        let mut registry = self.inner.write().await;
        let Some(code) = registry.code_by_room.get(room_id).cloned() else {
            return false;
        };
        if !registry.by_code.get(&code).is_some_and(|r| r.adhoc) {
            return false;
        }
        registry.by_code.remove(&code);
        registry.code_by_room.remove(room_id);
        tracing::debug!(room = %room_id, "Forgot ad-hoc room");
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_code.len()
    }
}

/// A human-readable meeting code like `abc-defg-hij`.
pub fn generate_meeting_code() -> String {
    let mut rng = rand::rng();
    let mut part = |len: usize| -> String {
        (0..len)
            .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
            .collect()
    };
    let (head, middle, tail) = (part(3), part(4), part(3));
    format!("{head}-{middle}-{tail}")
}

/// A 6-digit numeric password.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

fn generate_room_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_owned()
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            display_name: "Ada".into(),
        }
    }

    #[test]
    fn meeting_code_shape() {
        let code = generate_meeting_code();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![3, 4, 3]);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn password_is_six_digits() {
        let pw = generate_password();
        assert_eq!(pw.len(), 6);
        assert!(pw.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn password_hash_is_sha256_hex() {
        assert_eq!(
            hash_password("123456"),
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
        );
    }

    #[tokio::test]
    async fn join_normalizes_code_and_checks_password() {
        let dir = RoomDirectory::new();
        let record = dir.create("Standup", &host()).await;

        let code = format!("  {}  ", record.meeting_code.to_uppercase());
        let joined = dir.join(&code, &record.password_plain).await.unwrap();
        assert_eq!(joined.room_id, record.room_id);

        assert!(matches!(
            dir.join(&record.meeting_code, "000000x").await,
            Err(HuddleError::InvalidCredentials)
        ));
        assert!(matches!(
            dir.join("zzz-zzzz-zzz", "1").await,
            Err(HuddleError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn ensure_room_registers_once() {
        let dir = RoomDirectory::new();
        let first = host();
        let a = dir.ensure_room("deadbeef", &first, 8).await.unwrap();
        let b = dir.ensure_room("deadbeef", &host(), 8).await.unwrap();
        assert_eq!(a.meeting_code, b.meeting_code);
        assert_eq!(b.host_user_id, first.user_id);
        assert!(b.adhoc);
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn adhoc_rooms_are_capped_and_forgettable() {
        let dir = RoomDirectory::new();
        let created = dir.create("Standup", &host()).await;
        dir.ensure_room("r1", &host(), 2).await.unwrap();
        dir.ensure_room("r2", &host(), 2).await.unwrap();
        assert!(matches!(
            dir.ensure_room("r3", &host(), 2).await,
            Err(HuddleError::Validation { .. })
        ));
        // Known rooms are still served at the limit.
        assert!(dir.ensure_room(&created.room_id, &host(), 2).await.is_ok());
        assert!(dir.ensure_room("r1", &host(), 2).await.is_ok());

        assert!(dir.forget_adhoc("r1").await);
        assert!(!dir.forget_adhoc("r1").await);
        assert!(!dir.forget_adhoc(&created.room_id).await);
        assert!(dir.find_by_room("r1").await.is_none());
        assert!(dir.ensure_room("r3", &host(), 2).await.is_ok());
        assert_eq!(dir.len().await, 3);
    }
}
