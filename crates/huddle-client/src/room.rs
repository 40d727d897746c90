//! Room state synchronizer.
//!
//! Mirrors the relay's room: a snapshot replaces everything the relay owns, incremental
//! envelopes patch it. Private chat and local notices only ever exist on this side and
//! survive snapshots.

use std::collections::HashSet;

use chrono::Utc;
use huddle_common::models::{
    AdminSetting, AdminSettings, ChatMessage, MediaFlags, Participant, Poll, RoomSnapshot,
};
use huddle_common::protocol::NoticeCode;
use huddle_common::Envelope;
use uuid::Uuid;

/// Everything the UI needs to render the room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub room_id: String,
    pub self_id: Uuid,
    pub participants: Vec<Participant>,
    pub settings: AdminSettings,
    pub polls: Vec<Poll>,
    pub chat: Vec<ChatMessage>,
    pub private_chat: Vec<ChatMessage>,
    pub notices: Vec<(NoticeCode, String)>,
}

impl RoomState {
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_host(&self) -> bool {
        self.settings.is_host(self.self_id)
    }

    pub fn roster(&self) -> Vec<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }
}

/// What an applied envelope did to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomChange {
    Snapshot { resumed: bool },
    ParticipantJoined(Uuid),
    ParticipantLeft(Uuid),
    ParticipantUpdated(Uuid),
    ChatAppended,
    PrivateChatAppended,
    PollChanged(String),
    SettingChanged { setting: AdminSetting, enabled: bool },
    /// The host asked us to turn our microphone off.
    MuteRequested,
    Kicked { reason: String },
    Reaction { sender: Uuid, emoji: String },
    Whiteboard { sender: Option<Uuid>, payload: serde_json::Value },
    Notice { code: NoticeCode, message: String },
    Unchanged,
}

#[derive(Debug, Default)]
pub struct RoomView {
    state: RoomState,
    synced: bool,
    my_votes: HashSet<String>,
}

impl RoomView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has been applied yet.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn self_id(&self) -> Uuid {
        self.state.self_id
    }

    pub fn current_state(&self) -> RoomState {
        self.state.clone()
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.state.participant(user_id).is_some()
    }

    pub fn apply_snapshot(&mut self, snapshot: &RoomSnapshot) {
        self.state.room_id = snapshot.room_id.clone();
        self.state.self_id = snapshot.self_id;
        self.state.participants = snapshot.participants.clone();
        self.state.settings = snapshot.settings.clone();
        self.state.polls = snapshot.polls.clone();
        self.state.chat = snapshot.chat_history.clone();
        self.my_votes = snapshot.voted_polls.iter().cloned().collect();
        self.synced = true;
    }

    /// Apply any envelope. The router calls the typed methods below directly; this is
    /// the same thing for callers holding a raw envelope.
    pub fn apply_event(&mut self, envelope: &Envelope) -> RoomChange {
        match envelope {
            Envelope::RoomState(snapshot) => {
                self.apply_snapshot(snapshot);
                RoomChange::Snapshot {
                    resumed: snapshot.resumed,
                }
            }
            Envelope::UserJoined(participant) => self.participant_joined(participant.clone()),
            Envelope::UserLeft { user_id, .. } => self.participant_left(*user_id),
            Envelope::MediaState {
                media,
                user_id: Some(user_id),
            } => self.media_changed(*user_id, *media),
            Envelope::HandRaise {
                raised,
                user_id: Some(user_id),
                ..
            } => self.hand_changed(*user_id, *raised),
            Envelope::Chat {
                text,
                sender,
                sender_name,
                sent_at,
            } => self.chat_received(ChatMessage {
                sender: sender.unwrap_or_default(),
                sender_name: sender_name.clone().unwrap_or_default(),
                text: text.clone(),
                sent_at: sent_at.unwrap_or_else(Utc::now),
                private_to: None,
            }),
            Envelope::PrivateChat {
                target,
                text,
                sender,
                sender_name,
                sent_at,
            } => self.chat_received(ChatMessage {
                sender: sender.unwrap_or_default(),
                sender_name: sender_name.clone().unwrap_or_default(),
                text: text.clone(),
                sent_at: sent_at.unwrap_or_else(Utc::now),
                private_to: Some(*target),
            }),
            Envelope::Poll { poll } => self.poll_received(poll.clone()),
            Envelope::PollVote {
                poll_id,
                option,
                voter,
            } => self.vote_received(poll_id, *option, *voter),
            Envelope::AdminSetting {
                setting,
                enabled,
                target_user_id,
                ..
            } => self.setting_received(*setting, *enabled, *target_user_id),
            Envelope::Kick { target_user_id, .. } => {
                self.kicked(*target_user_id, "Removed by the host".into())
            }
            Envelope::Kicked {
                target_user_id,
                reason,
            } => self.kicked(*target_user_id, reason.clone()),
            Envelope::Reaction { emoji, sender, .. } => RoomChange::Reaction {
                sender: sender.unwrap_or_default(),
                emoji: emoji.clone(),
            },
            Envelope::Whiteboard { payload, sender } => RoomChange::Whiteboard {
                sender: *sender,
                payload: payload.clone(),
            },
            Envelope::Notice { code, message } => self.notice_received(*code, message.clone()),
            Envelope::MediaState { user_id: None, .. }
            | Envelope::HandRaise { user_id: None, .. }
            | Envelope::Signal { .. }
            | Envelope::Unknown => RoomChange::Unchanged,
        }
    }

    /// Re-joining a known participant is a no-op.
    pub fn participant_joined(&mut self, participant: Participant) -> RoomChange {
        if self.contains(participant.user_id) {
            return RoomChange::Unchanged;
        }
        let user_id = participant.user_id;
        self.state.participants.push(participant);
        RoomChange::ParticipantJoined(user_id)
    }

    pub fn participant_left(&mut self, user_id: Uuid) -> RoomChange {
        let before = self.state.participants.len();
        self.state.participants.retain(|p| p.user_id != user_id);
        if self.state.participants.len() == before {
            RoomChange::Unchanged
        } else {
            RoomChange::ParticipantLeft(user_id)
        }
    }

    pub fn media_changed(&mut self, user_id: Uuid, media: MediaFlags) -> RoomChange {
        self.update_participant(user_id, |p| {
            let changed = p.media != media;
            p.media = media;
            changed
        })
    }

    pub fn hand_changed(&mut self, user_id: Uuid, raised: bool) -> RoomChange {
        self.update_participant(user_id, |p| {
            let changed = p.hand_raised != raised;
            p.hand_raised = raised;
            changed
        })
    }

    /// Append a chat line in arrival order. Lines with `private_to` go to the private log.
    pub fn chat_received(&mut self, message: ChatMessage) -> RoomChange {
        if message.private_to.is_some() {
            self.state.private_chat.push(message);
            RoomChange::PrivateChatAppended
        } else {
            self.state.chat.push(message);
            RoomChange::ChatAppended
        }
    }

    /// Insert a poll or replace the one with the same id.
    pub fn poll_received(&mut self, poll: Poll) -> RoomChange {
        let id = poll.id.clone();
        match self.state.polls.iter_mut().find(|p| p.id == poll.id) {
            Some(existing) if *existing == poll => return RoomChange::Unchanged,
            Some(existing) => *existing = poll,
            None => self.state.polls.push(poll),
        }
        RoomChange::PollChanged(id)
    }

    pub fn vote_received(&mut self, poll_id: &str, option: usize, voter: Option<Uuid>) -> RoomChange {
        let Some(poll) = self.state.polls.iter_mut().find(|p| p.id == poll_id) else {
            return RoomChange::Unchanged;
        };
        if !poll.record_vote(option) {
            return RoomChange::Unchanged;
        }
        if voter == Some(self.state.self_id) {
            self.my_votes.insert(poll_id.to_owned());
        }
        RoomChange::PollChanged(poll_id.to_owned())
    }

    /// Toggles re-set the same field, so re-applying one is a no-op. Mute actions only
    /// ask the local media controller to act.
    pub fn setting_received(
        &mut self,
        setting: AdminSetting,
        enabled: bool,
        target: Option<Uuid>,
    ) -> RoomChange {
        let self_id = self.state.self_id;
        match setting {
            AdminSetting::MuteAll if enabled && !self.state.settings.is_host(self_id) => {
                RoomChange::MuteRequested
            }
            AdminSetting::MuteParticipant if enabled && target == Some(self_id) => {
                RoomChange::MuteRequested
            }
            AdminSetting::MuteAll | AdminSetting::MuteParticipant => RoomChange::Unchanged,
            _ => {
                if self.state.settings.apply(setting, enabled) {
                    RoomChange::SettingChanged { setting, enabled }
                } else {
                    RoomChange::Unchanged
                }
            }
        }
    }

    pub fn kicked(&mut self, target: Uuid, reason: String) -> RoomChange {
        if target == self.state.self_id {
            RoomChange::Kicked { reason }
        } else {
            RoomChange::Unchanged
        }
    }

    pub fn notice_received(&mut self, code: NoticeCode, message: String) -> RoomChange {
        self.push_notice(code, message.clone());
        RoomChange::Notice { code, message }
    }

    /// Record a notice raised locally (device failures, refused actions).
    pub fn push_notice(&mut self, code: NoticeCode, message: impl Into<String>) {
        self.state.notices.push((code, message.into()));
    }

    /// Vote in `poll_id` through `send`. Refused if we already voted, the poll is closed
    /// or the option does not exist. The vote is counted locally, and only once `send`
    /// accepts it, because the relay does not echo it back to the voter.
    pub fn cast_vote(
        &mut self,
        poll_id: &str,
        option: usize,
        send: impl FnOnce(&Envelope) -> bool,
    ) -> bool {
        if self.my_votes.contains(poll_id) {
            return false;
        }
        let Some(poll) = self.state.polls.iter_mut().find(|p| p.id == poll_id) else {
            return false;
        };
        if !poll.active || option >= poll.options.len() {
            return false;
        }
        let vote = Envelope::PollVote {
            poll_id: poll_id.to_owned(),
            option,
            voter: None,
        };
        if !send(&vote) {
            return false;
        }
        poll.record_vote(option);
        self.my_votes.insert(poll_id.to_owned());
        true
    }

    pub fn has_voted(&self, poll_id: &str) -> bool {
        self.my_votes.contains(poll_id)
    }

    /// Apply our own media flags; the relay does not echo them back.
    pub fn set_own_media(&mut self, media: MediaFlags) {
        let self_id = self.state.self_id;
        self.update_participant(self_id, |p| {
            p.media = media;
            true
        });
    }

    pub fn set_own_hand(&mut self, raised: bool) {
        let self_id = self.state.self_id;
        self.update_participant(self_id, |p| {
            p.hand_raised = raised;
            true
        });
    }

    pub fn own_media(&self) -> MediaFlags {
        self.state
            .participant(self.state.self_id)
            .map(|p| p.media)
            .unwrap_or_default()
    }

    fn update_participant(
        &mut self,
        user_id: Uuid,
        update: impl FnOnce(&mut Participant) -> bool,
    ) -> RoomChange {
        match self
            .state
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            Some(participant) => {
                if update(participant) {
                    RoomChange::ParticipantUpdated(user_id)
                } else {
                    RoomChange::Unchanged
                }
            }
            None => RoomChange::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_common::models::Role;

    fn snapshot(self_id: Uuid, host: Uuid, others: &[Uuid]) -> RoomSnapshot {
        let mut participants = vec![Participant::new(host, "Host", Role::Host)];
        participants.extend(
            others
                .iter()
                .map(|id| Participant::new(*id, format!("guest-{id}"), Role::Guest)),
        );
        RoomSnapshot {
            room_id: "deadbeef".into(),
            self_id,
            participants,
            settings: AdminSettings {
                host_id: Some(host),
                ..AdminSettings::default()
            },
            polls: vec![Poll::new("p1", "Lunch?", &["pizza", "sushi"])],
            chat_history: Vec::new(),
            resumed: false,
            voted_polls: Vec::new(),
        }
    }

    fn chat(text: &str, sender: Uuid) -> Envelope {
        Envelope::Chat {
            text: text.into(),
            sender: Some(sender),
            sender_name: Some("x".into()),
            sent_at: Some(Utc::now()),
        }
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let (host, me, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        let joined = Envelope::UserJoined(Participant::new(other, "Other", Role::Guest));
        assert_eq!(view.apply_event(&joined), RoomChange::ParticipantJoined(other));
        assert_eq!(view.apply_event(&joined), RoomChange::Unchanged);
        assert_eq!(view.state().participants.len(), 3);

        let left = Envelope::UserLeft {
            user_id: other,
            display_name: "Other".into(),
        };
        assert_eq!(view.apply_event(&left), RoomChange::ParticipantLeft(other));
        assert_eq!(view.apply_event(&left), RoomChange::Unchanged);
        assert_eq!(view.state().roster(), vec![host, me]);
    }

    #[test]
    fn reapplying_admin_setting_changes_nothing() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        let env = Envelope::AdminSetting {
            setting: AdminSetting::ScreenShare,
            enabled: false,
            target_user_id: None,
            sender: Some(host),
        };
        assert_eq!(
            view.apply_event(&env),
            RoomChange::SettingChanged {
                setting: AdminSetting::ScreenShare,
                enabled: false
            }
        );
        let once = view.current_state();
        assert_eq!(view.apply_event(&env), RoomChange::Unchanged);
        assert_eq!(view.current_state(), once);
    }

    #[test]
    fn mute_requests_target_the_right_people() {
        let (host, me, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut guest = RoomView::new();
        guest.apply_snapshot(&snapshot(me, host, &[me, other]));
        let mut host_view = RoomView::new();
        host_view.apply_snapshot(&snapshot(host, host, &[me, other]));

        let mute_all = Envelope::AdminSetting {
            setting: AdminSetting::MuteAll,
            enabled: true,
            target_user_id: None,
            sender: Some(host),
        };
        assert_eq!(guest.apply_event(&mute_all), RoomChange::MuteRequested);
        assert_eq!(host_view.apply_event(&mute_all), RoomChange::Unchanged);

        let mute_other = Envelope::AdminSetting {
            setting: AdminSetting::MuteParticipant,
            enabled: true,
            target_user_id: Some(other),
            sender: Some(host),
        };
        assert_eq!(guest.apply_event(&mute_other), RoomChange::Unchanged);
    }

    #[test]
    fn snapshot_replaces_public_chat_but_keeps_private() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        view.apply_event(&chat("hello", host));
        view.apply_event(&Envelope::PrivateChat {
            target: me,
            text: "psst".into(),
            sender: Some(host),
            sender_name: Some("Host".into()),
            sent_at: Some(Utc::now()),
        });

        let mut resumed = snapshot(me, host, &[me]);
        resumed.chat_history = view.state().chat.clone();
        resumed.resumed = true;
        assert_eq!(
            view.apply_event(&Envelope::RoomState(resumed)),
            RoomChange::Snapshot { resumed: true }
        );
        view.apply_event(&chat("after", host));

        let texts: Vec<&str> = view.state().chat.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "after"]);
        assert_eq!(view.state().private_chat.len(), 1);
    }

    #[test]
    fn cast_vote_refuses_second_vote_and_bad_options() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        let mut sent = Vec::new();
        assert!(!view.cast_vote("p1", 5, |v| { sent.push(v.clone()); true }));
        assert!(!view.cast_vote("nope", 0, |v| { sent.push(v.clone()); true }));
        assert!(view.cast_vote("p1", 1, |v| { sent.push(v.clone()); true }));
        assert!(!view.cast_vote("p1", 0, |v| { sent.push(v.clone()); true }));
        assert_eq!(
            sent,
            vec![Envelope::PollVote {
                poll_id: "p1".into(),
                option: 1,
                voter: None
            }]
        );
        assert_eq!(view.state().polls[0].options[1].votes, 1);
        assert!(view.has_voted("p1"));
    }

    #[test]
    fn unsent_vote_is_not_counted_and_can_be_retried() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        assert!(!view.cast_vote("p1", 0, |_| false));
        assert!(!view.has_voted("p1"));
        assert_eq!(view.state().polls[0].total_votes(), 0);

        assert!(view.cast_vote("p1", 0, |_| true));
        assert!(view.has_voted("p1"));
        assert_eq!(view.state().polls[0].total_votes(), 1);
    }

    #[test]
    fn snapshot_decides_which_polls_we_voted_in() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));
        assert!(view.cast_vote("p1", 0, |_| true));

        // The relay never saw that vote.
        view.apply_snapshot(&snapshot(me, host, &[me]));
        assert!(!view.has_voted("p1"));
        assert!(view.cast_vote("p1", 1, |_| true));

        let mut counted = snapshot(me, host, &[me]);
        counted.voted_polls = vec!["p1".into()];
        view.apply_snapshot(&counted);
        assert!(view.has_voted("p1"));
        assert!(!view.cast_vote("p1", 1, |_| true));
    }

    #[test]
    fn closed_polls_take_no_votes() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));
        let mut closed = view.state().polls[0].clone();
        closed.active = false;
        assert_eq!(
            view.apply_event(&Envelope::Poll { poll: closed }),
            RoomChange::PollChanged("p1".into())
        );
        assert!(!view.cast_vote("p1", 0, |_| true));
    }

    #[test]
    fn kicked_only_when_targeted() {
        let (host, me, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me, other]));

        let kicked_other = Envelope::Kicked {
            target_user_id: other,
            reason: "bye".into(),
        };
        assert_eq!(view.apply_event(&kicked_other), RoomChange::Unchanged);
        let kicked_me = Envelope::Kicked {
            target_user_id: me,
            reason: "bye".into(),
        };
        assert_eq!(
            view.apply_event(&kicked_me),
            RoomChange::Kicked { reason: "bye".into() }
        );
    }

    #[test]
    fn media_state_updates_the_sender() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));
        let media = MediaFlags {
            audio_on: true,
            ..MediaFlags::default()
        };
        let env = Envelope::MediaState {
            media,
            user_id: Some(host),
        };
        assert_eq!(view.apply_event(&env), RoomChange::ParticipantUpdated(host));
        assert_eq!(view.apply_event(&env), RoomChange::Unchanged);
        assert!(view.state().participant(host).unwrap().media.audio_on);
    }

    #[test]
    fn hand_changes_only_touch_seated_participants() {
        let (host, me) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = RoomView::new();
        view.apply_snapshot(&snapshot(me, host, &[me]));

        assert_eq!(view.hand_changed(me, true), RoomChange::ParticipantUpdated(me));
        assert_eq!(view.hand_changed(me, true), RoomChange::Unchanged);
        assert_eq!(view.hand_changed(Uuid::new_v4(), true), RoomChange::Unchanged);
        assert!(view.state().participant(me).unwrap().hand_raised);
    }
}
