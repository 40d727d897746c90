//! Control-plane wire protocol: the only contract shared by relay and client.
//!
//! Every frame is a JSON object with a mandatory `type` discriminant. The same enum is
//! used in both directions: clients leave `sender`/`sender_name`/`user_id` empty and the
//! relay stamps them from the authenticated identity before fanning out.
//!
//! Media never flows through this channel; `signal` envelopes only carry the SDP and
//! ICE metadata peers need to open a direct connection to each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AdminSetting, MediaFlags, Participant, Poll, RoomSnapshot};

/// WebSocket close codes used by the relay. Everything in the 44xx range is terminal:
/// a client must not retry automatically.
pub mod close_code {
    pub const UNAUTHORIZED: u16 = 4401;
    pub const KICKED: u16 = 4403;
    /// The same identity connected again elsewhere and took over the seat.
    pub const REPLACED: u16 = 4409;
    pub const ROOM_LOCKED: u16 = 4423;
    pub const ROOM_FULL: u16 = 4429;
    pub const INTERNAL: u16 = 4500;

    pub fn is_terminal(code: u16) -> bool {
        (4400..4500).contains(&code)
    }
}

/// A control-plane envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Relay → client: full authoritative state, sent on every (re)connect.
    RoomState(RoomSnapshot),

    /// Relay → clients: someone new took a seat.
    UserJoined(Participant),

    /// Relay → clients: a seat was released (leave, kick or expired reconnect grace).
    UserLeft {
        user_id: Uuid,
        #[serde(default)]
        display_name: String,
    },

    /// Directed negotiation metadata. Clients set `target`; the relay delivers it to
    /// that participant only, with `sender` stamped.
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
        payload: SignalPayload,
    },

    Chat {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<DateTime<Utc>>,
    },

    PrivateChat {
        target: Uuid,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<DateTime<Utc>>,
    },

    Reaction {
        emoji: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },

    HandRaise {
        #[serde(default)]
        raised: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },

    MediaState {
        #[serde(flatten)]
        media: MediaFlags,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
    },

    /// Create or update a poll (same id replaces; `active: false` closes it).
    Poll { poll: Poll },

    PollVote {
        #[serde(rename = "pollId", alias = "poll_id")]
        poll_id: String,
        option: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voter: Option<Uuid>,
    },

    /// Opaque whiteboard strokes, relayed as-is to everyone else.
    #[serde(alias = "WHITEBOARD")]
    Whiteboard {
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
    },

    AdminSetting {
        setting: AdminSetting,
        enabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
    },

    /// Host → relay: remove a participant.
    Kick {
        target_user_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<Uuid>,
    },

    /// Relay → kicked participant, right before its socket is closed.
    #[serde(alias = "KICKED")]
    Kicked { target_user_id: Uuid, reason: String },

    /// Relay → client: an action was rejected or needs the user's attention.
    Notice { code: NoticeCode, message: String },

    /// Any type this build does not know. Ignored by receivers.
    #[serde(other)]
    Unknown,
}

/// Payload of a `signal` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalPayload {
    Description(SessionDescription),
    Candidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeCode {
    NotHost,
    ChatDisabled,
    PrivateChatDisabled,
    ScreenShareDisabled,
    AlreadyVoted,
    UnknownPoll,
    UnknownParticipant,
    MessageTooLong,
    DeviceUnavailable,
}

impl Envelope {
    /// The wire discriminant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomState(_) => "room-state",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Signal { .. } => "signal",
            Self::Chat { .. } => "chat",
            Self::PrivateChat { .. } => "private-chat",
            Self::Reaction { .. } => "reaction",
            Self::HandRaise { .. } => "hand-raise",
            Self::MediaState { .. } => "media-state",
            Self::Poll { .. } => "poll",
            Self::PollVote { .. } => "poll-vote",
            Self::Whiteboard { .. } => "whiteboard",
            Self::AdminSetting { .. } => "admin-setting",
            Self::Kick { .. } => "kick",
            Self::Kicked { .. } => "kicked",
            Self::Notice { .. } => "notice",
            Self::Unknown => "unknown",
        }
    }

    /// Only the room host may emit these.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::AdminSetting { .. } | Self::Kick { .. })
    }

    pub fn notice(code: NoticeCode, message: impl Into<String>) -> Self {
        Self::Notice {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_signal_matches_wire_shape() {
        let target = Uuid::new_v4();
        let env = Envelope::Signal {
            target: Some(target),
            sender: None,
            payload: SignalPayload::Description(SessionDescription::offer("v=0")),
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "signal",
                "target": target,
                "payload": {"type": "offer", "sdp": "v=0"},
            })
        );
    }

    #[test]
    fn candidate_payload_decodes_browser_shape() {
        let raw = json!({
            "type": "signal",
            "sender": Uuid::nil(),
            "payload": {"candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }}
        });
        let env: Envelope = serde_json::from_value(raw).unwrap();
        let Envelope::Signal { payload: SignalPayload::Candidate { candidate }, .. } = env else {
            panic!("expected candidate signal");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn unknown_types_decode_to_unknown() {
        let env = Envelope::decode(r#"{"type":"confetti","amount":9000}"#).unwrap();
        assert_eq!(env, Envelope::Unknown);
    }

    #[test]
    fn legacy_uppercase_types_are_accepted() {
        let env = Envelope::decode(
            r#"{"type":"KICKED","target_user_id":"00000000-0000-0000-0000-000000000000","reason":"bye"}"#,
        )
        .unwrap();
        assert!(matches!(env, Envelope::Kicked { .. }));
        let env = Envelope::decode(r#"{"type":"WHITEBOARD","payload":{"x":1}}"#).unwrap();
        assert!(matches!(env, Envelope::Whiteboard { .. }));
    }

    #[test]
    fn user_joined_flattens_participant() {
        let p = Participant::new(Uuid::nil(), "Grace", crate::models::Role::Guest);
        let value = serde_json::to_value(Envelope::UserJoined(p)).unwrap();
        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["display_name"], "Grace");
        assert_eq!(value["audio_on"], false);
    }

    #[test]
    fn poll_vote_uses_camel_case_id() {
        let env = Envelope::decode(r#"{"type":"poll-vote","pollId":"p1","option":2}"#).unwrap();
        assert_eq!(
            env,
            Envelope::PollVote {
                poll_id: "p1".into(),
                option: 2,
                voter: None
            }
        );
    }

    #[test]
    fn terminal_codes() {
        assert!(close_code::is_terminal(close_code::UNAUTHORIZED));
        assert!(close_code::is_terminal(close_code::KICKED));
        assert!(close_code::is_terminal(close_code::REPLACED));
        assert!(!close_code::is_terminal(1006));
        assert!(!close_code::is_terminal(close_code::INTERNAL));
    }
}
