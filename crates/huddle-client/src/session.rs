//! A joined meeting.
//!
//! [`Session::join`] spawns one task that owns the transport, the room view, the peer
//! engine and the media controller. Socket reads and per-peer negotiation run on their
//! own tasks; this one only routes between them. The returned [`Session`] handle talks
//! to it over a command channel.

use std::sync::Arc;
use std::time::Duration;

use huddle_common::models::{
    AdminSetting, ChatMessage, MediaFlags, Participant, Poll, RoomSnapshot,
};
use huddle_common::protocol::{close_code, NoticeCode, SignalPayload};
use huddle_common::Envelope;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::media::{CaptureDevices, MediaController, RenderSurface, SyntheticDevices};
use crate::peer::{LinkReport, NegotiationState, PeerEngine, ReconcilePolicy};
use crate::room::{RoomChange, RoomState, RoomView};
use crate::router::{self, ControlHandler};
use crate::rtc::{PeerConnector, WebRtcConnector};
use crate::transport::{TerminalReason, Transport, TransportEvent};

/// What the session reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Reconnecting { retry_in: Duration },
    Room(RoomChange),
    Peer { remote: Uuid, state: NegotiationState },
    Ended(EndReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Left,
    Kicked { reason: String },
    /// The relay refused our token; re-authenticate before joining again.
    Unauthorized,
    /// The same identity joined from another connection, which now holds the seat.
    Replaced,
    Rejected { code: u16, reason: String },
}

enum Command {
    Mic(bool, oneshot::Sender<bool>),
    Camera(bool, oneshot::Sender<bool>),
    ScreenShare(bool, oneshot::Sender<bool>),
    Send(Envelope),
    Vote {
        poll_id: String,
        option: usize,
        reply: oneshot::Sender<bool>,
    },
    ClosePoll(String),
    AttachSurface(Arc<dyn RenderSurface>),
    State(oneshot::Sender<RoomState>),
    Peers(oneshot::Sender<Vec<(Uuid, NegotiationState)>>),
    Leave(oneshot::Sender<()>),
}

/// Handle to a running session. Dropping it leaves the room.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
}

impl Session {
    /// Join `room_id`. Returns immediately; progress arrives on the event receiver.
    /// Fails only when the relay URL cannot be turned into a signaling endpoint.
    pub fn join(
        config: &ClientConfig,
        room_id: &str,
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn CaptureDevices>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        let (transport, transport_rx) = Transport::connect(config, room_id)?;
        let (engine, reports_rx) =
            PeerEngine::new(connector, outbox_tx.clone(), config.negotiation_timeout());

        let core = SessionCore {
            transport,
            view: RoomView::new(),
            engine,
            media: MediaController::new(devices, outbox_tx),
            events: events_tx,
            ended: None,
        };
        info!(room = %room_id, "Session: joining");
        tokio::spawn(core.run(transport_rx, outbox_rx, reports_rx, commands_rx));

        Ok((
            Self {
                commands: commands_tx,
            },
            events_rx,
        ))
    }

    /// Join with the `webrtc` stack and synthetic capture devices.
    pub fn join_with_webrtc(
        config: &ClientConfig,
        room_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let connector = Arc::new(WebRtcConnector::new(config.ice_servers.clone())?);
        Self::join(config, room_id, connector, Arc::new(SyntheticDevices::new()))
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command(build(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub async fn set_mic(&self, on: bool) -> Result<bool> {
        self.ask(|reply| Command::Mic(on, reply)).await
    }

    pub async fn set_camera(&self, on: bool) -> Result<bool> {
        self.ask(|reply| Command::Camera(on, reply)).await
    }

    pub async fn set_screen_share(&self, on: bool) -> Result<bool> {
        self.ask(|reply| Command::ScreenShare(on, reply)).await
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Send(Envelope::Chat {
            text: text.into(),
            sender: None,
            sender_name: None,
            sent_at: None,
        }))
    }

    pub fn send_private_chat(&self, target: Uuid, text: impl Into<String>) -> Result<()> {
        self.command(Command::Send(Envelope::PrivateChat {
            target,
            text: text.into(),
            sender: None,
            sender_name: None,
            sent_at: None,
        }))
    }

    pub fn react(&self, emoji: impl Into<String>) -> Result<()> {
        self.command(Command::Send(Envelope::Reaction {
            emoji: emoji.into(),
            sender: None,
            sender_name: None,
        }))
    }

    pub fn raise_hand(&self, raised: bool) -> Result<()> {
        self.command(Command::Send(Envelope::HandRaise {
            raised,
            user_id: None,
            sender_name: None,
        }))
    }

    pub fn draw(&self, payload: serde_json::Value) -> Result<()> {
        self.command(Command::Send(Envelope::Whiteboard {
            payload,
            sender: None,
        }))
    }

    /// Open a poll. Returns its id.
    pub fn create_poll(&self, question: &str, options: &[&str]) -> Result<String> {
        let poll = Poll::new(Uuid::new_v4().simple().to_string(), question, options);
        let id = poll.id.clone();
        self.command(Command::Send(Envelope::Poll { poll }))?;
        Ok(id)
    }

    pub fn close_poll(&self, poll_id: impl Into<String>) -> Result<()> {
        self.command(Command::ClosePoll(poll_id.into()))
    }

    /// Vote once. Resolves to false if we already voted or the vote is invalid.
    pub async fn vote(&self, poll_id: impl Into<String>, option: usize) -> Result<bool> {
        let poll_id = poll_id.into();
        self.ask(|reply| Command::Vote {
            poll_id,
            option,
            reply,
        })
        .await
    }

    /// Host only; the relay answers anyone else with a notice.
    pub fn set_admin(&self, setting: AdminSetting, enabled: bool) -> Result<()> {
        self.command(Command::Send(Envelope::AdminSetting {
            setting,
            enabled,
            target_user_id: None,
            sender: None,
        }))
    }

    pub fn mute_all(&self) -> Result<()> {
        self.set_admin(AdminSetting::MuteAll, true)
    }

    pub fn mute_participant(&self, target: Uuid) -> Result<()> {
        self.command(Command::Send(Envelope::AdminSetting {
            setting: AdminSetting::MuteParticipant,
            enabled: true,
            target_user_id: Some(target),
            sender: None,
        }))
    }

    pub fn kick(&self, target: Uuid) -> Result<()> {
        self.command(Command::Send(Envelope::Kick {
            target_user_id: target,
            sender: None,
        }))
    }

    pub fn attach_surface(&self, surface: Arc<dyn RenderSurface>) -> Result<()> {
        self.command(Command::AttachSurface(surface))
    }

    pub async fn state(&self) -> Result<RoomState> {
        self.ask(Command::State).await
    }

    pub async fn peer_states(&self) -> Result<Vec<(Uuid, NegotiationState)>> {
        self.ask(Command::Peers).await
    }

    /// Leave the room. Calling it again, or after the session ended, is a no-op.
    pub async fn leave(&self) {
        let _ = self.ask(Command::Leave).await;
    }
}

struct SessionCore {
    transport: Transport,
    view: RoomView,
    engine: PeerEngine,
    media: MediaController,
    events: mpsc::UnboundedSender<SessionEvent>,
    ended: Option<EndReason>,
}

impl SessionCore {
    async fn run(
        mut self,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut outbox_rx: mpsc::UnboundedReceiver<Envelope>,
        mut reports_rx: mpsc::UnboundedReceiver<LinkReport>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        while self.ended.is_none() {
            tokio::select! {
                event = transport_rx.recv() => match event {
                    Some(event) => self.on_transport(event),
                    None => self.end(EndReason::Left),
                },
                Some(envelope) = outbox_rx.recv() => {
                    if !self.transport.send(&envelope) {
                        debug!(kind = envelope.kind(), "Session: not connected, dropped outbound envelope");
                    }
                }
                Some(report) = reports_rx.recv() => self.on_report(report),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => self.end(EndReason::Left),
                },
            }
        }
        debug!(reason = ?self.ended, "Session: stopped");
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { attempt } => {
                debug!(attempt, "Session: signaling connected");
                self.emit(SessionEvent::Connected);
            }
            TransportEvent::Envelope(envelope) => {
                let host = self.view.state().settings.host_id;
                let _ = router::dispatch(self, envelope, host);
            }
            TransportEvent::Disconnected { retry_in } => {
                // Links and room state stay up; the next snapshot reconciles them.
                self.emit(SessionEvent::Reconnecting { retry_in });
            }
            TransportEvent::Terminated(reason) => {
                let reason = match reason {
                    TerminalReason::Closed => EndReason::Left,
                    ref rejected if rejected.needs_reauth() => EndReason::Unauthorized,
                    TerminalReason::Rejected { code, reason } if code == close_code::KICKED => {
                        EndReason::Kicked { reason }
                    }
                    TerminalReason::Rejected { code, .. } if code == close_code::REPLACED => {
                        EndReason::Replaced
                    }
                    TerminalReason::Rejected { code, reason } => EndReason::Rejected { code, reason },
                };
                self.end(reason);
            }
        }
    }

    fn on_report(&mut self, report: LinkReport) {
        let in_roster = self.view.contains(report.remote);
        self.engine.on_report(report, in_roster);
        self.emit(SessionEvent::Peer {
            remote: report.remote,
            state: report.state,
        });
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Mic(on, reply) => {
                let ok = self.media.set_mic(on, &mut self.engine, &mut self.view).await;
                let _ = reply.send(ok);
            }
            Command::Camera(on, reply) => {
                let ok = self.media.set_camera(on, &mut self.engine, &mut self.view).await;
                let _ = reply.send(ok);
            }
            Command::ScreenShare(on, reply) => {
                let ok = self
                    .media
                    .set_screen_share(on, &mut self.engine, &mut self.view)
                    .await;
                let _ = reply.send(ok);
            }
            Command::Send(envelope) => {
                if let Envelope::HandRaise { raised, .. } = &envelope {
                    self.view.set_own_hand(*raised);
                }
                if !self.transport.send(&envelope) {
                    debug!(kind = envelope.kind(), "Session: not connected, dropped envelope");
                }
            }
            Command::Vote {
                poll_id,
                option,
                reply,
            } => {
                let transport = &self.transport;
                let cast = self.view.cast_vote(&poll_id, option, |vote| transport.send(vote));
                let _ = reply.send(cast);
            }
            Command::ClosePoll(poll_id) => {
                let poll = self
                    .view
                    .state()
                    .polls
                    .iter()
                    .find(|p| p.id == poll_id)
                    .cloned();
                match poll {
                    Some(mut poll) => {
                        poll.active = false;
                        self.transport.send(&Envelope::Poll { poll });
                    }
                    None => self
                        .view
                        .push_notice(NoticeCode::UnknownPoll, format!("No poll {poll_id}")),
                }
            }
            Command::AttachSurface(surface) => self.media.attach_surface(surface),
            Command::State(reply) => {
                let _ = reply.send(self.view.current_state());
            }
            Command::Peers(reply) => {
                let _ = reply.send(self.engine.peers());
            }
            Command::Leave(reply) => {
                self.end(EndReason::Left);
                let _ = reply.send(());
            }
        }
    }

    /// Tear everything down once and tell the application why.
    fn end(&mut self, reason: EndReason) {
        if self.ended.is_some() {
            return;
        }
        self.media.leave(&mut self.engine, &self.transport);
        info!(?reason, "Session: ended");
        self.emit(SessionEvent::Ended(reason.clone()));
        self.ended = Some(reason);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_change(&self, change: RoomChange) {
        if change != RoomChange::Unchanged {
            self.emit(SessionEvent::Room(change));
        }
    }
}

impl ControlHandler for SessionCore {
    fn room_state(&mut self, snapshot: RoomSnapshot) {
        self.view.apply_snapshot(&snapshot);
        self.engine.set_local_id(snapshot.self_id);

        let roster: Vec<Uuid> = snapshot.participants.iter().map(|p| p.user_id).collect();
        let policy = if snapshot.resumed {
            ReconcilePolicy::Resumed
        } else {
            ReconcilePolicy::Fresh
        };
        info!(
            room = %snapshot.room_id,
            participants = roster.len(),
            resumed = snapshot.resumed,
            "Session: room snapshot"
        );
        self.engine.reconcile(&roster, policy);

        // A fresh seat starts with everything off; tell the room what we actually send.
        if !snapshot.resumed && self.media.flags() != MediaFlags::default() {
            self.media.announce(&mut self.view);
        }

        self.emit_change(RoomChange::Snapshot {
            resumed: snapshot.resumed,
        });
    }

    fn user_joined(&mut self, participant: Participant) {
        // The newcomer offers; we only answer.
        let change = self.view.participant_joined(participant);
        self.emit_change(change);
    }

    fn user_left(&mut self, user_id: Uuid) {
        self.engine.close(user_id);
        self.media.detach_surface(user_id);
        let change = self.view.participant_left(user_id);
        self.emit_change(change);
    }

    fn signal(&mut self, sender: Uuid, payload: SignalPayload) {
        self.engine.handle_signal(sender, payload);
    }

    fn chat(&mut self, message: ChatMessage) {
        let change = self.view.chat_received(message);
        self.emit_change(change);
    }

    fn private_chat(&mut self, message: ChatMessage) {
        let change = self.view.chat_received(message);
        self.emit_change(change);
    }

    fn reaction(&mut self, sender: Uuid, _sender_name: String, emoji: String) {
        self.emit_change(RoomChange::Reaction { sender, emoji });
    }

    fn hand_raise(&mut self, user_id: Uuid, raised: bool) {
        let change = self.view.hand_changed(user_id, raised);
        self.emit_change(change);
    }

    fn media_state(&mut self, user_id: Uuid, media: MediaFlags) {
        let change = self.view.media_changed(user_id, media);
        self.emit_change(change);
    }

    fn poll(&mut self, poll: Poll) {
        let change = self.view.poll_received(poll);
        self.emit_change(change);
    }

    fn poll_vote(&mut self, poll_id: String, option: usize, voter: Option<Uuid>) {
        let change = self.view.vote_received(&poll_id, option, voter);
        self.emit_change(change);
    }

    fn whiteboard(&mut self, sender: Option<Uuid>, payload: serde_json::Value) {
        self.emit_change(RoomChange::Whiteboard { sender, payload });
    }

    fn admin_setting(&mut self, setting: AdminSetting, enabled: bool, target: Option<Uuid>) {
        let change = self.view.setting_received(setting, enabled, target);
        match change {
            RoomChange::MuteRequested => {
                info!("Session: muted by the host");
                self.media.mute(&mut self.view);
            }
            RoomChange::SettingChanged {
                setting: AdminSetting::ScreenShare,
                enabled: false,
            } if !self.view.state().is_host() => {
                self.media.stop_screen_share(&mut self.engine, &mut self.view);
            }
            _ => {}
        }
        self.emit_change(change);
    }

    fn kick(&mut self, target: Uuid) {
        if let RoomChange::Kicked { reason } = self.view.kicked(target, "Removed by the host".into()) {
            self.end(EndReason::Kicked { reason });
        }
    }

    fn kicked(&mut self, target: Uuid, reason: String) {
        if let RoomChange::Kicked { reason } = self.view.kicked(target, reason) {
            warn!(%reason, "Session: removed from the room");
            self.end(EndReason::Kicked { reason });
        }
    }

    fn notice(&mut self, code: NoticeCode, message: String) {
        let change = self.view.notice_received(code, message);
        self.emit_change(change);
    }
}
