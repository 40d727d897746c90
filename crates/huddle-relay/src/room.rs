//! Room actor: the single writer of a room's authoritative state.
//!
//! ```text
//!   conn task A ──┐                       ┌──▶ outbound A ──▶ socket A
//!   conn task B ──┼──▶ RoomCommand queue ──┼──▶ outbound B ──▶ socket B
//!   conn task C ──┘      (one task)        └──▶ outbound C ──▶ socket C
//! ```
//!
//! Every connection task posts commands to its room's queue; the room task applies them
//! one at a time, so concurrent joins, leaves and admin toggles never race. Fan-out uses
//! `try_send` on each connection's bounded outbound queue: a slow socket loses envelopes
//! (at-most-once) instead of stalling the whole room.

use chrono::Utc;
use huddle_common::auth::Identity;
use huddle_common::config::AppConfig;
use huddle_common::error::HuddleError;
use huddle_common::models::{AdminSetting, AdminSettings, ChatMessage, Participant, Poll, Role, RoomSnapshot};
use huddle_common::protocol::{close_code, Envelope, NoticeCode};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::directory::RoomDirectory;

/// Identifies one WebSocket connection. A participant that reconnects gets a new one,
/// which lets the room ignore late commands from the socket it replaced.
pub type ConnectionId = Uuid;

const KICK_REASON: &str = "Host removed you from the meeting";
const REPLACED_REASON: &str = "Joined from another connection";

/// What a room asks a connection's writer task to do.
#[derive(Debug)]
pub enum Outbound {
    Envelope(Envelope),
    Close { code: u16, reason: String },
}

/// Commands sent to the room task.
#[derive(Debug)]
pub enum RoomCommand {
    /// Take (or resume) a seat. The snapshot is delivered through `outbound`, ahead of
    /// anything else the room sends to this connection.
    Join {
        identity: Identity,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
        reply: oneshot::Sender<Result<(), HuddleError>>,
    },
    /// An envelope read from a participant's socket.
    Inbound {
        user_id: Uuid,
        conn_id: ConnectionId,
        envelope: Envelope,
    },
    /// Deliberate leave: release the seat immediately.
    Leave { user_id: Uuid, conn_id: ConnectionId },
    /// The socket dropped; keep the seat for the reconnect grace period.
    Disconnected { user_id: Uuid, conn_id: ConnectionId },
    /// Grace period elapsed for a dropped connection.
    Expire { user_id: Uuid, conn_id: ConnectionId },
    Stats { reply: oneshot::Sender<RoomStats> },
    Shutdown,
}

/// Statistics for one room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub room_id: String,
    pub participants: usize,
    pub connected: usize,
    pub polls: usize,
    pub chat_messages: usize,
}

/// Cheap, cloneable access to a running room task.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: String,
    instance: Uuid,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Post a command. Returns false if the room task has already exited.
    pub async fn send(&self, cmd: RoomCommand) -> bool {
        self.tx.send(cmd).await.is_ok()
    }

    pub async fn stats(&self) -> Option<RoomStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(RoomCommand::Stats { reply }).await {
            return None;
        }
        rx.await.ok()
    }
}

/// Manages all room tasks on this relay.
#[derive(Clone)]
pub struct RoomManager {
    /// Handles for each active room.
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    /// Ad-hoc records are forgotten here when their room task ends.
    directory: Option<RoomDirectory>,
    config: Arc<AppConfig>,
}

impl RoomManager {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            directory: None,
            config,
        }
    }

    pub fn with_directory(mut self, directory: RoomDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Get or create the task for `room_id`. `host_id` is only used when the room is
    /// created by this call.
    pub async fn get_or_create_room(&self, room_id: &str, host_id: Option<Uuid>) -> RoomHandle {
        // Fast path: room exists
        {
            let rooms = self.rooms.read().await;
            if let Some(handle) = rooms.get(room_id) {
                return handle.clone();
            }
        }

        // Slow path: create room
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(handle) = rooms.get(room_id) {
            return handle.clone();
        }

        let (cmd_tx, cmd_rx) = mpsc::channel::<RoomCommand>(self.config.relay.room_queue_capacity);
        let handle = RoomHandle {
            room_id: room_id.to_owned(),
            instance: Uuid::new_v4(),
            tx: cmd_tx.clone(),
        };

        let room = RoomActor::new(room_id.to_owned(), host_id, cmd_tx.downgrade(), self.config.clone());
        let rooms_ref = self.rooms.clone();
        let directory = self.directory.clone();
        let room_id_owned = room_id.to_owned();
        let instance = handle.instance;

        tokio::spawn(async move {
            room.run(cmd_rx).await;
            // Clean up when room shuts down, unless a newer task already took the slot
            let mut rooms = rooms_ref.write().await;
            if rooms.get(&room_id_owned).is_some_and(|h| h.instance == instance) {
                rooms.remove(&room_id_owned);
            }
            // Still holding the lock, so no new task can start for this id meanwhile.
            if let Some(directory) = directory.filter(|_| !rooms.contains_key(&room_id_owned)) {
                directory.forget_adhoc(&room_id_owned).await;
            }
            tracing::info!(room = %room_id_owned, "Room task shut down");
        });

        rooms.insert(room_id.to_owned(), handle.clone());
        tracing::info!(room = %room_id, "Room task created");

        handle
    }

    /// Seat `identity` in `room_id`, creating the room if needed.
    ///
    /// A room task may be exiting (its last participant just left) at the moment we look
    /// it up; in that case the stale handle is dropped and a fresh task is started.
    pub async fn join(
        &self,
        room_id: &str,
        host_id: Option<Uuid>,
        identity: Identity,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<RoomHandle, HuddleError> {
        for _ in 0..3 {
            let handle = self.get_or_create_room(room_id, host_id).await;
            let (reply, rx) = oneshot::channel();
            let cmd = RoomCommand::Join {
                identity: identity.clone(),
                conn_id,
                outbound: outbound.clone(),
                reply,
            };
            if handle.send(cmd).await {
                if let Ok(result) = rx.await {
                    return result.map(|()| handle);
                }
            }
            self.forget(&handle).await;
        }
        Err(HuddleError::Internal(anyhow::anyhow!(
            "room {room_id} shut down while joining"
        )))
    }

    async fn forget(&self, handle: &RoomHandle) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(&handle.room_id)
            .is_some_and(|h| h.instance == handle.instance)
        {
            rooms.remove(&handle.room_id);
        }
    }

    pub async fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Number of seated participants, 0 for rooms without a running task.
    pub async fn participant_count(&self, room_id: &str) -> usize {
        match self.room(room_id).await {
            Some(handle) => handle.stats().await.map(|s| s.participants).unwrap_or(0),
            None => 0,
        }
    }

    /// Shut a room down, closing every connection in it.
    pub async fn remove_room(&self, room_id: &str) {
        let handle = self.rooms.write().await.remove(room_id);
        if let Some(handle) = handle {
            let _ = handle.send(RoomCommand::Shutdown).await;
        }
    }

    /// Get the number of active rooms.
    pub async fn active_room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Aggregate stats across rooms.
    pub async fn stats(&self) -> Vec<RoomStats> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(stats) = handle.stats().await {
                out.push(stats);
            }
        }
        out
    }
}

/// A seated participant and the connection currently serving them.
struct Seat {
    participant: Participant,
    conn_id: ConnectionId,
    /// `None` while the socket is down and the seat is held for a reconnect.
    outbound: Option<mpsc::Sender<Outbound>>,
}

struct RoomActor {
    room_id: String,
    /// Join order is preserved; rooms are small enough that linear lookups are fine.
    seats: Vec<Seat>,
    settings: AdminSettings,
    polls: Vec<Poll>,
    /// poll id → participants who already voted
    voters: HashMap<String, HashSet<Uuid>>,
    chat: VecDeque<ChatMessage>,
    /// Kicked participants may not come back.
    banned: HashSet<Uuid>,
    /// Weak so that pending expiry timers don't keep the room alive.
    commands: mpsc::WeakSender<RoomCommand>,
    config: Arc<AppConfig>,
}

enum Flow {
    Continue,
    Stop,
}

impl RoomActor {
    fn new(
        room_id: String,
        host_id: Option<Uuid>,
        commands: mpsc::WeakSender<RoomCommand>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            room_id,
            seats: Vec::new(),
            settings: AdminSettings {
                host_id,
                ..AdminSettings::default()
            },
            polls: Vec::new(),
            voters: HashMap::new(),
            chat: VecDeque::new(),
            banned: HashSet::new(),
            commands,
            config,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<RoomCommand>) {
        while let Some(cmd) = cmd_rx.recv().await {
            if let Flow::Stop = self.handle(cmd) {
                break;
            }
        }
        for seat in &self.seats {
            if let Some(outbound) = &seat.outbound {
                let _ = outbound.try_send(Outbound::Close {
                    code: 1001,
                    reason: "room closed".into(),
                });
            }
        }
    }

    fn handle(&mut self, cmd: RoomCommand) -> Flow {
        match cmd {
            RoomCommand::Join {
                identity,
                conn_id,
                outbound,
                reply,
            } => {
                let result = self.join(identity, conn_id, outbound);
                let rejected = result.is_err();
                let _ = reply.send(result);
                if rejected && self.seats.is_empty() {
                    return Flow::Stop;
                }
            }

            RoomCommand::Inbound {
                user_id,
                conn_id,
                envelope,
            } => {
                if !self.is_current(user_id, conn_id) {
                    tracing::debug!(room = %self.room_id, user = %user_id, "Dropping envelope from replaced connection");
                    return Flow::Continue;
                }
                self.route(user_id, envelope);
            }

            RoomCommand::Leave { user_id, conn_id } => {
                if self.is_current(user_id, conn_id) {
                    self.release(user_id, "left");
                }
            }

            RoomCommand::Disconnected { user_id, conn_id } => {
                self.disconnected(user_id, conn_id);
            }

            RoomCommand::Expire { user_id, conn_id } => {
                let expired = self
                    .seat(user_id)
                    .is_some_and(|s| s.conn_id == conn_id && s.outbound.is_none());
                if expired {
                    self.release(user_id, "reconnect grace expired");
                }
            }

            RoomCommand::Stats { reply } => {
                let _ = reply.send(RoomStats {
                    room_id: self.room_id.clone(),
                    participants: self.seats.len(),
                    connected: self.seats.iter().filter(|s| s.outbound.is_some()).count(),
                    polls: self.polls.len(),
                    chat_messages: self.chat.len(),
                });
                return Flow::Continue;
            }

            RoomCommand::Shutdown => {
                tracing::info!(room = %self.room_id, "Room shutting down by command");
                return Flow::Stop;
            }
        }

        if self.seats.is_empty() {
            tracing::info!(room = %self.room_id, "Room empty, shutting down");
            return Flow::Stop;
        }
        Flow::Continue
    }

    // ── Membership ───────────────────────────────────────────────────────────

    fn join(
        &mut self,
        identity: Identity,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<(), HuddleError> {
        let user_id = identity.user_id;

        if self.banned.contains(&user_id) {
            return Err(HuddleError::Banned);
        }

        if let Some(seat) = self.seats.iter_mut().find(|s| s.participant.user_id == user_id) {
            // Resume: same identity again, possibly from a new device. The old socket (if
            // still open) is told to go away and its late commands are ignored.
            if let Some(old) = seat.outbound.replace(outbound) {
                let _ = old.try_send(Outbound::Close {
                    code: close_code::REPLACED,
                    reason: REPLACED_REASON.into(),
                });
            }
            seat.conn_id = conn_id;
            let snapshot = self.snapshot_for(user_id, true);
            self.send_to(user_id, Envelope::RoomState(snapshot));
            tracing::info!(room = %self.room_id, user = %user_id, "Participant resumed seat");
            return Ok(());
        }

        let is_host = match self.settings.host_id {
            Some(host) => host == user_id,
            None => {
                self.settings.host_id = Some(user_id);
                true
            }
        };

        if self.settings.locked && !is_host {
            return Err(HuddleError::RoomLocked);
        }
        if self.seats.len() >= self.config.limits.max_participants_per_room {
            return Err(HuddleError::RoomFull {
                capacity: self.config.limits.max_participants_per_room,
            });
        }

        let role = if is_host { Role::Host } else { Role::Guest };
        let participant = Participant::new(user_id, identity.display_name, role);
        self.seats.push(Seat {
            participant: participant.clone(),
            conn_id,
            outbound: Some(outbound),
        });

        let snapshot = self.snapshot_for(user_id, false);
        self.send_to(user_id, Envelope::RoomState(snapshot));
        self.broadcast(&Envelope::UserJoined(participant), Some(user_id));

        tracing::info!(
            room = %self.room_id,
            user = %user_id,
            host = is_host,
            participants = self.seats.len(),
            "Participant joined room"
        );
        Ok(())
    }

    fn disconnected(&mut self, user_id: Uuid, conn_id: ConnectionId) {
        let grace = self.config.relay.reconnect_grace();
        let Some(seat) = self.seat_mut(user_id) else {
            return;
        };
        if seat.conn_id != conn_id {
            return;
        }
        seat.outbound = None;

        if grace.is_zero() {
            self.release(user_id, "disconnected");
            return;
        }

        tracing::debug!(room = %self.room_id, user = %user_id, ?grace, "Holding seat for reconnect");
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(RoomCommand::Expire { user_id, conn_id }).await;
            }
        });
    }

    /// Remove a seat and tell everyone else.
    fn release(&mut self, user_id: Uuid, why: &str) {
        let Some(idx) = self.seats.iter().position(|s| s.participant.user_id == user_id) else {
            return;
        };
        let seat = self.seats.remove(idx);
        self.broadcast(
            &Envelope::UserLeft {
                user_id,
                display_name: seat.participant.display_name.clone(),
            },
            None,
        );
        tracing::info!(room = %self.room_id, user = %user_id, reason = why, "Participant left room");
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    fn route(&mut self, from: Uuid, envelope: Envelope) {
        let Some(sender) = self.seat(from).map(|s| s.participant.clone()) else {
            return;
        };
        let is_host = self.settings.is_host(from);

        if envelope.is_privileged() && !is_host {
            tracing::warn!(room = %self.room_id, user = %from, kind = envelope.kind(), "Rejected privileged envelope from non-host");
            self.notice(from, NoticeCode::NotHost, "Only the host can do that");
            return;
        }

        match envelope {
            Envelope::Signal {
                target: Some(target),
                payload,
                ..
            } => {
                let delivered = self.send_to(
                    target,
                    Envelope::Signal {
                        target: None,
                        sender: Some(from),
                        payload,
                    },
                );
                if !delivered {
                    tracing::debug!(room = %self.room_id, from = %from, to = %target, "Dropped signal for absent participant");
                }
            }

            Envelope::Signal { target: None, .. } => {
                tracing::debug!(room = %self.room_id, from = %from, "Dropped signal without target");
            }

            Envelope::Chat { text, .. } => {
                if !self.check_length(from, &text) {
                    return;
                }
                if !self.settings.community_chat_enabled && !is_host {
                    self.notice(from, NoticeCode::ChatDisabled, "Chat is disabled by the host");
                    return;
                }
                let message = ChatMessage {
                    sender: from,
                    sender_name: sender.display_name.clone(),
                    text,
                    sent_at: Utc::now(),
                    private_to: None,
                };
                self.chat.push_back(message.clone());
                while self.chat.len() > self.config.limits.max_chat_history {
                    self.chat.pop_front();
                }
                self.broadcast(
                    &Envelope::Chat {
                        text: message.text,
                        sender: Some(from),
                        sender_name: Some(message.sender_name),
                        sent_at: Some(message.sent_at),
                    },
                    None,
                );
            }

            Envelope::PrivateChat { target, text, .. } => {
                if !self.check_length(from, &text) {
                    return;
                }
                if !self.settings.private_chat_enabled && !is_host {
                    self.notice(from, NoticeCode::PrivateChatDisabled, "Private chat is disabled by the host");
                    return;
                }
                if self.seat(target).is_none() {
                    self.notice(from, NoticeCode::UnknownParticipant, "That participant is no longer here");
                    return;
                }
                let env = Envelope::PrivateChat {
                    target,
                    text,
                    sender: Some(from),
                    sender_name: Some(sender.display_name.clone()),
                    sent_at: Some(Utc::now()),
                };
                self.send_to(target, env.clone());
                if target != from {
                    self.send_to(from, env);
                }
            }

            Envelope::Reaction { emoji, .. } => {
                self.broadcast(
                    &Envelope::Reaction {
                        emoji,
                        sender: Some(from),
                        sender_name: Some(sender.display_name.clone()),
                    },
                    Some(from),
                );
            }

            Envelope::HandRaise { raised, .. } => {
                if let Some(seat) = self.seat_mut(from) {
                    seat.participant.hand_raised = raised;
                }
                self.broadcast(
                    &Envelope::HandRaise {
                        raised,
                        user_id: Some(from),
                        sender_name: Some(sender.display_name.clone()),
                    },
                    Some(from),
                );
            }

            Envelope::MediaState { mut media, .. } => {
                if media.screen_sharing && !self.settings.screen_share_enabled && !is_host {
                    media.screen_sharing = false;
                    self.notice(from, NoticeCode::ScreenShareDisabled, "Screen sharing is disabled by the host");
                }
                if let Some(seat) = self.seat_mut(from) {
                    seat.participant.media = media;
                }
                self.broadcast(
                    &Envelope::MediaState {
                        media,
                        user_id: Some(from),
                    },
                    Some(from),
                );
            }

            Envelope::Poll { poll } => self.upsert_poll(from, is_host, poll),

            Envelope::PollVote { poll_id, option, .. } => self.vote(from, poll_id, option),

            Envelope::Whiteboard { payload, .. } => {
                self.broadcast(
                    &Envelope::Whiteboard {
                        payload,
                        sender: Some(from),
                    },
                    Some(from),
                );
            }

            Envelope::AdminSetting {
                setting,
                enabled,
                target_user_id,
                ..
            } => {
                if setting == AdminSetting::MuteParticipant
                    && target_user_id.is_none_or(|t| self.seat(t).is_none())
                {
                    self.notice(from, NoticeCode::UnknownParticipant, "That participant is no longer here");
                    return;
                }
                let changed = self.settings.apply(setting, enabled);
                tracing::info!(room = %self.room_id, ?setting, enabled, changed, "Admin setting applied");
                // Everyone, host included, converges on the relayed value.
                self.broadcast(
                    &Envelope::AdminSetting {
                        setting,
                        enabled,
                        target_user_id,
                        sender: Some(from),
                    },
                    None,
                );
            }

            Envelope::Kick { target_user_id, .. } => self.kick(from, target_user_id),

            other => {
                tracing::debug!(room = %self.room_id, user = %from, kind = other.kind(), "Ignoring relay-only envelope from client");
            }
        }
    }

    fn upsert_poll(&mut self, from: Uuid, is_host: bool, mut poll: Poll) {
        if let Some(existing) = self.polls.iter_mut().find(|p| p.id == poll.id) {
            if existing.creator != Some(from) && !is_host {
                self.notice(from, NoticeCode::NotHost, "Only the poll creator can change it");
                return;
            }
            // Tallies stay authoritative here; updates may only close or reopen.
            existing.active = poll.active;
            let updated = existing.clone();
            self.broadcast(&Envelope::Poll { poll: updated }, None);
            return;
        }

        poll.creator = Some(from);
        for option in &mut poll.options {
            option.votes = 0;
        }
        tracing::info!(room = %self.room_id, poll = %poll.id, "Poll created");
        self.polls.push(poll.clone());
        self.broadcast(&Envelope::Poll { poll }, None);
    }

    fn vote(&mut self, from: Uuid, poll_id: String, option: usize) {
        let Some(poll) = self.polls.iter_mut().find(|p| p.id == poll_id) else {
            self.notice(from, NoticeCode::UnknownPoll, "That poll does not exist");
            return;
        };
        let voters = self.voters.entry(poll_id.clone()).or_default();
        if voters.contains(&from) {
            self.notice(from, NoticeCode::AlreadyVoted, "You already voted in this poll");
            return;
        }
        if !poll.record_vote(option) {
            self.notice(from, NoticeCode::UnknownPoll, "That poll is closed or the option is invalid");
            return;
        }
        voters.insert(from);
        self.broadcast(
            &Envelope::PollVote {
                poll_id,
                option,
                voter: Some(from),
            },
            Some(from),
        );
    }

    fn kick(&mut self, from: Uuid, target: Uuid) {
        if target == from {
            return;
        }
        let Some(seat) = self.seat(target) else {
            self.notice(from, NoticeCode::UnknownParticipant, "That participant is no longer here");
            return;
        };
        if let Some(outbound) = &seat.outbound {
            let _ = outbound.try_send(Outbound::Envelope(Envelope::Kicked {
                target_user_id: target,
                reason: KICK_REASON.into(),
            }));
            let _ = outbound.try_send(Outbound::Close {
                code: close_code::KICKED,
                reason: KICK_REASON.into(),
            });
        }
        self.banned.insert(target);
        tracing::info!(room = %self.room_id, host = %from, user = %target, "Participant kicked");
        self.release(target, "kicked");
    }

    // ── Delivery ─────────────────────────────────────────────────────────────

    fn seat(&self, user_id: Uuid) -> Option<&Seat> {
        self.seats.iter().find(|s| s.participant.user_id == user_id)
    }

    fn seat_mut(&mut self, user_id: Uuid) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.participant.user_id == user_id)
    }

    fn is_current(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        self.seat(user_id).is_some_and(|s| s.conn_id == conn_id)
    }

    fn snapshot_for(&self, user_id: Uuid, resumed: bool) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            self_id: user_id,
            participants: self.seats.iter().map(|s| s.participant.clone()).collect(),
            settings: self.settings.clone(),
            polls: self.polls.clone(),
            chat_history: self.chat.iter().cloned().collect(),
            resumed,
            voted_polls: self
                .polls
                .iter()
                .filter(|p| self.voters.get(&p.id).is_some_and(|v| v.contains(&user_id)))
                .map(|p| p.id.clone())
                .collect(),
        }
    }

    fn deliver(&self, seat: &Seat, envelope: Envelope) -> bool {
        let Some(outbound) = &seat.outbound else {
            return false;
        };
        match outbound.try_send(Outbound::Envelope(envelope)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(room = %self.room_id, user = %seat.participant.user_id, "Outbound queue full, dropping envelope");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn send_to(&self, user_id: Uuid, envelope: Envelope) -> bool {
        match self.seat(user_id) {
            Some(seat) => self.deliver(seat, envelope),
            None => false,
        }
    }

    fn broadcast(&self, envelope: &Envelope, exclude: Option<Uuid>) {
        for seat in &self.seats {
            if Some(seat.participant.user_id) == exclude {
                continue;
            }
            self.deliver(seat, envelope.clone());
        }
    }

    fn notice(&self, user_id: Uuid, code: NoticeCode, message: &str) {
        self.send_to(user_id, Envelope::notice(code, message));
    }

    fn check_length(&self, from: Uuid, text: &str) -> bool {
        let max = self.config.limits.max_message_length;
        if text.chars().count() > max {
            self.notice(from, NoticeCode::MessageTooLong, &format!("Messages are limited to {max} characters"));
            return false;
        }
        true
    }
}
