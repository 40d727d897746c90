use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

/// Outbound media state a participant advertises to the room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    #[serde(default)]
    pub audio_on: bool,
    #[serde(default)]
    pub video_on: bool,
    #[serde(default)]
    pub screen_sharing: bool,
}

/// A member of a room as seen by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
    #[serde(flatten)]
    pub media: MediaFlags,
    #[serde(default)]
    pub hand_raised: bool,
}

impl Participant {
    pub fn new(user_id: Uuid, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            role,
            media: MediaFlags::default(),
            hand_raised: false,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}
