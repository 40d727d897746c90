//! Control-plane router.
//!
//! [`dispatch`] hands each inbound envelope to exactly one [`ControlHandler`] method.
//! Privileged envelopes are dropped unless the relay-stamped sender is the room host.

use chrono::Utc;
use huddle_common::models::{AdminSetting, ChatMessage, MediaFlags, Participant, Poll, RoomSnapshot};
use huddle_common::protocol::{NoticeCode, SignalPayload};
use huddle_common::Envelope;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receiver of routed control-plane envelopes. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait ControlHandler {
    fn room_state(&mut self, snapshot: RoomSnapshot) {}
    fn user_joined(&mut self, participant: Participant) {}
    fn user_left(&mut self, user_id: Uuid) {}
    fn signal(&mut self, sender: Uuid, payload: SignalPayload) {}
    fn chat(&mut self, message: ChatMessage) {}
    fn private_chat(&mut self, message: ChatMessage) {}
    fn reaction(&mut self, sender: Uuid, sender_name: String, emoji: String) {}
    fn hand_raise(&mut self, user_id: Uuid, raised: bool) {}
    fn media_state(&mut self, user_id: Uuid, media: MediaFlags) {}
    fn poll(&mut self, poll: Poll) {}
    fn poll_vote(&mut self, poll_id: String, option: usize, voter: Option<Uuid>) {}
    fn whiteboard(&mut self, sender: Option<Uuid>, payload: serde_json::Value) {}
    fn admin_setting(&mut self, setting: AdminSetting, enabled: bool, target: Option<Uuid>) {}
    fn kick(&mut self, target: Uuid) {}
    fn kicked(&mut self, target: Uuid, reason: String) {}
    fn notice(&mut self, code: NoticeCode, message: String) {}
}

/// Why an envelope did not reach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    NotFromHost,
    MissingSender,
    Unknown,
}

/// Route `envelope` to its handler. `host` is the current room host.
pub fn dispatch<H: ControlHandler + ?Sized>(
    handler: &mut H,
    envelope: Envelope,
    host: Option<Uuid>,
) -> Result<(), Dropped> {
    if envelope.is_privileged() {
        let sender = match &envelope {
            Envelope::AdminSetting { sender, .. } | Envelope::Kick { sender, .. } => *sender,
            _ => None,
        };
        if sender.is_none() || sender != host {
            warn!(kind = envelope.kind(), ?sender, "Router: dropping privileged envelope not sent by the host");
            return Err(Dropped::NotFromHost);
        }
    }

    match envelope {
        Envelope::RoomState(snapshot) => handler.room_state(snapshot),
        Envelope::UserJoined(participant) => handler.user_joined(participant),
        Envelope::UserLeft { user_id, .. } => handler.user_left(user_id),
        Envelope::Signal {
            sender: Some(sender),
            payload,
            ..
        } => handler.signal(sender, payload),
        Envelope::Chat {
            text,
            sender: Some(sender),
            sender_name,
            sent_at,
        } => handler.chat(ChatMessage {
            sender,
            sender_name: sender_name.unwrap_or_default(),
            text,
            sent_at: sent_at.unwrap_or_else(Utc::now),
            private_to: None,
        }),
        Envelope::PrivateChat {
            target,
            text,
            sender: Some(sender),
            sender_name,
            sent_at,
        } => handler.private_chat(ChatMessage {
            sender,
            sender_name: sender_name.unwrap_or_default(),
            text,
            sent_at: sent_at.unwrap_or_else(Utc::now),
            private_to: Some(target),
        }),
        Envelope::Reaction {
            emoji,
            sender: Some(sender),
            sender_name,
        } => handler.reaction(sender, sender_name.unwrap_or_default(), emoji),
        Envelope::HandRaise {
            raised,
            user_id: Some(user_id),
            ..
        } => handler.hand_raise(user_id, raised),
        Envelope::MediaState {
            media,
            user_id: Some(user_id),
        } => handler.media_state(user_id, media),
        Envelope::Poll { poll } => handler.poll(poll),
        Envelope::PollVote {
            poll_id,
            option,
            voter,
        } => handler.poll_vote(poll_id, option, voter),
        Envelope::Whiteboard { payload, sender } => handler.whiteboard(sender, payload),
        Envelope::AdminSetting {
            setting,
            enabled,
            target_user_id,
            ..
        } => handler.admin_setting(setting, enabled, target_user_id),
        Envelope::Kick { target_user_id, .. } => handler.kick(target_user_id),
        Envelope::Kicked {
            target_user_id,
            reason,
        } => handler.kicked(target_user_id, reason),
        Envelope::Notice { code, message } => handler.notice(code, message),

        // Everything the relay stamps arrives stamped; an unstamped copy is not ours to trust.
        Envelope::Signal { sender: None, .. }
        | Envelope::Chat { sender: None, .. }
        | Envelope::PrivateChat { sender: None, .. }
        | Envelope::Reaction { sender: None, .. }
        | Envelope::HandRaise { user_id: None, .. }
        | Envelope::MediaState { user_id: None, .. } => {
            debug!("Router: dropping envelope without a sender");
            return Err(Dropped::MissingSender);
        }
        Envelope::Unknown => {
            debug!("Router: ignoring unknown envelope");
            return Err(Dropped::Unknown);
        }
    }
    Ok(())
}
