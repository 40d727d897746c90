use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChatMessage, Participant, Poll};

/// Room-wide toggles controlled by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSettings {
    #[serde(default)]
    pub locked: bool,
    pub community_chat_enabled: bool,
    pub private_chat_enabled: bool,
    pub screen_share_enabled: bool,
    #[serde(default)]
    pub host_id: Option<Uuid>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            locked: false,
            community_chat_enabled: true,
            private_chat_enabled: true,
            screen_share_enabled: true,
            host_id: None,
        }
    }
}

/// The `setting` discriminant of an `admin-setting` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminSetting {
    CommunityChat,
    PrivateChat,
    MuteAll,
    MuteParticipant,
    ScreenShare,
    MeetingLocked,
}

impl AdminSetting {
    /// Mute actions are one-shot commands rather than persistent toggles.
    pub fn is_action(self) -> bool {
        matches!(self, Self::MuteAll | Self::MuteParticipant)
    }
}

impl AdminSettings {
    /// Replace the field behind `setting`. Returns whether the value changed;
    /// re-applying the same envelope is always a no-op.
    pub fn apply(&mut self, setting: AdminSetting, enabled: bool) -> bool {
        let field = match setting {
            AdminSetting::CommunityChat => &mut self.community_chat_enabled,
            AdminSetting::PrivateChat => &mut self.private_chat_enabled,
            AdminSetting::ScreenShare => &mut self.screen_share_enabled,
            AdminSetting::MeetingLocked => &mut self.locked,
            AdminSetting::MuteAll | AdminSetting::MuteParticipant => return false,
        };
        let changed = *field != enabled;
        *field = enabled;
        changed
    }

    pub fn is_host(&self, user_id: Uuid) -> bool {
        self.host_id == Some(user_id)
    }
}

/// Full authoritative room state, sent on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    /// The receiving participant's own id.
    pub self_id: Uuid,
    pub participants: Vec<Participant>,
    pub settings: AdminSettings,
    #[serde(default)]
    pub polls: Vec<Poll>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    /// True when the relay kept this participant's seat across a reconnect, so peers
    /// never saw them leave.
    #[serde(default)]
    pub resumed: bool,
    /// Ids of the polls the receiving participant has already voted in.
    #[serde(default)]
    pub voted_polls: Vec<String>,
}

impl RoomSnapshot {
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}
