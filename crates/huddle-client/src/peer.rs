//! Peer negotiation engine.
//!
//! One [`PeerLink`] actor per remote participant owns that participant's connection and
//! runs the offer/answer state machine in order. [`PeerEngine`] keeps the keyed map of
//! link handles, fans track changes out to every link and reconciles the map against
//! the room roster. Links report every state transition on the report channel; the
//! session feeds those back through [`PeerEngine::on_report`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use huddle_common::protocol::{IceCandidate, SdpKind, SessionDescription, SignalPayload};
use huddle_common::Envelope;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::rtc::{
    sdp_session_id, LinkEvent, LinkState, LocalTrack, MediaKind, PeerConnection, PeerConnector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceStatus {
    /// Descriptions are exchanged; the stack has not reported connectivity yet.
    Pending,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    Answering,
    Connected(IceStatus),
    Recovering,
    Failed,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// A state transition of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    pub remote: Uuid,
    /// Distinguishes a re-created link from the one it replaced.
    pub link_id: u64,
    pub state: NegotiationState,
}

/// Which links a roster snapshot should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// First join, or a rejoin the room treated as new: drop every link and offer to
    /// everyone in the roster.
    Fresh,
    /// Our seat survived a reconnect: keep links to present peers and re-create missing
    /// ones from the side with the smaller id.
    Resumed,
}

enum LinkCommand {
    Offer,
    Signal(SignalPayload),
    Attach(LocalTrack),
    Detach(MediaKind),
    Close,
}

struct LinkHandle {
    link_id: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: watch::Receiver<NegotiationState>,
}

pub struct PeerEngine {
    local_id: Uuid,
    connector: Arc<dyn PeerConnector>,
    outbox: mpsc::UnboundedSender<Envelope>,
    reports: mpsc::UnboundedSender<LinkReport>,
    negotiation_timeout: Duration,
    links: HashMap<Uuid, LinkHandle>,
    tracks: HashMap<MediaKind, LocalTrack>,
    next_link_id: u64,
}

impl PeerEngine {
    /// Outbound `signal` envelopes go to `outbox`; link transitions arrive on the
    /// returned receiver.
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        outbox: mpsc::UnboundedSender<Envelope>,
        negotiation_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<LinkReport>) {
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let engine = Self {
            local_id: Uuid::nil(),
            connector,
            outbox,
            reports,
            negotiation_timeout,
            links: HashMap::new(),
            tracks: HashMap::new(),
            next_link_id: 1,
        };
        (engine, reports_rx)
    }

    /// Our participant id, as told by the first room snapshot.
    pub fn set_local_id(&mut self, local_id: Uuid) {
        self.local_id = local_id;
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Start negotiating with `remote` unless a link already exists.
    pub fn ensure_offer(&mut self, remote: Uuid) {
        if remote == self.local_id || self.links.contains_key(&remote) {
            return;
        }
        let handle = self.spawn_link(remote);
        let _ = handle.commands.send(LinkCommand::Offer);
        self.links.insert(remote, handle);
    }

    /// Route an inbound signal from `sender`. Only an offer opens a new link.
    pub fn handle_signal(&mut self, sender: Uuid, payload: SignalPayload) {
        if sender == self.local_id {
            return;
        }
        let payload = match self.links.get(&sender) {
            Some(link) => match link.commands.send(LinkCommand::Signal(payload)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(LinkCommand::Signal(payload))) if is_offer(&payload) => {
                    // A fresh offer replaces the exited actor; its pending report is then stale.
                    self.links.remove(&sender);
                    payload
                }
                Err(_) => {
                    // Keep the handle so the exited actor's report still matches and can
                    // recreate the link.
                    debug!(remote = %sender, "Peer: dropping signal for exited link");
                    return;
                }
            },
            None => payload,
        };

        if !is_offer(&payload) {
            debug!(remote = %sender, "Peer: dropping signal for unknown link");
            return;
        }
        let handle = self.spawn_link(sender);
        let _ = handle.commands.send(LinkCommand::Signal(payload));
        self.links.insert(sender, handle);
    }

    /// Tear down the link to `remote`, if any.
    pub fn close(&mut self, remote: Uuid) {
        if let Some(link) = self.links.remove(&remote) {
            let _ = link.commands.send(LinkCommand::Close);
        }
    }

    pub fn close_all(&mut self) {
        for (_, link) in self.links.drain() {
            let _ = link.commands.send(LinkCommand::Close);
        }
    }

    /// Put `track` on the sender for its kind on every link, present and future.
    pub fn set_track(&mut self, track: LocalTrack) {
        for link in self.links.values() {
            let _ = link.commands.send(LinkCommand::Attach(track.clone()));
        }
        self.tracks.insert(track.kind(), track);
    }

    pub fn remove_track(&mut self, kind: MediaKind) {
        if self.tracks.remove(&kind).is_none() {
            return;
        }
        for link in self.links.values() {
            let _ = link.commands.send(LinkCommand::Detach(kind));
        }
    }

    /// Make the link set match `roster` (which may include ourselves).
    pub fn reconcile(&mut self, roster: &[Uuid], policy: ReconcilePolicy) {
        if policy == ReconcilePolicy::Fresh {
            self.close_all();
        }

        let stale: Vec<Uuid> = self
            .links
            .keys()
            .filter(|id| !roster.contains(id))
            .copied()
            .collect();
        for remote in stale {
            self.close(remote);
        }

        for &remote in roster {
            if remote == self.local_id || self.links.contains_key(&remote) {
                continue;
            }
            if policy == ReconcilePolicy::Fresh || self.local_id < remote {
                self.ensure_offer(remote);
            }
        }
    }

    /// Handle a transition reported by a link. A failed link is dropped and, if the
    /// remote is still present, re-created from the side with the smaller id.
    pub fn on_report(&mut self, report: LinkReport, in_roster: bool) {
        if !report.state.is_terminal() {
            return;
        }
        let current = self
            .links
            .get(&report.remote)
            .is_some_and(|link| link.link_id == report.link_id);
        if !current {
            return;
        }
        self.links.remove(&report.remote);

        if report.state == NegotiationState::Failed && in_roster && self.local_id < report.remote {
            info!(remote = %report.remote, "Peer: re-creating failed link");
            self.ensure_offer(report.remote);
        }
    }

    pub fn state(&self, remote: Uuid) -> Option<NegotiationState> {
        self.links.get(&remote).map(|link| *link.state.borrow())
    }

    pub fn peers(&self) -> Vec<(Uuid, NegotiationState)> {
        self.links
            .iter()
            .map(|(id, link)| (*id, *link.state.borrow()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn spawn_link(&mut self, remote: Uuid) -> LinkHandle {
        let link_id = self.next_link_id;
        self.next_link_id += 1;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(NegotiationState::Idle);
        let link = PeerLink {
            remote,
            local: self.local_id,
            link_id,
            connector: Arc::clone(&self.connector),
            conn: None,
            fresh_events: None,
            remote_session: None,
            initiator: false,
            has_remote: false,
            discard_candidates: false,
            pending: Vec::new(),
            state: NegotiationState::Idle,
            state_tx,
            reports: self.reports.clone(),
            outbox: self.outbox.clone(),
            tracks: self.tracks.clone(),
            deadline: None,
            timeout: self.negotiation_timeout,
        };
        tokio::spawn(link.run(commands_rx));

        LinkHandle {
            link_id,
            commands: commands_tx,
            state: state_rx,
        }
    }
}

fn is_offer(payload: &SignalPayload) -> bool {
    matches!(
        payload,
        SignalPayload::Description(SessionDescription {
            kind: SdpKind::Offer,
            ..
        })
    )
}

struct PeerLink {
    remote: Uuid,
    local: Uuid,
    link_id: u64,
    connector: Arc<dyn PeerConnector>,
    conn: Option<Arc<dyn PeerConnection>>,
    /// Event channel of a connection opened during the last command.
    fresh_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    /// `o=` session id of the remote description, to spot a remote that started over.
    remote_session: Option<String>,
    /// We sent the first offer on the current connection; only we restart ICE.
    initiator: bool,
    has_remote: bool,
    /// Candidates belonging to an offer we ignored.
    discard_candidates: bool,
    pending: Vec<IceCandidate>,
    state: NegotiationState,
    state_tx: watch::Sender<NegotiationState>,
    reports: mpsc::UnboundedSender<LinkReport>,
    outbox: mpsc::UnboundedSender<Envelope>,
    tracks: HashMap<MediaKind, LocalTrack>,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl PeerLink {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<LinkCommand>) {
        let mut events: Option<mpsc::UnboundedReceiver<LinkEvent>> = None;

        loop {
            let deadline = self.deadline;
            let result = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(LinkCommand::Close) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(event) = next_event(&mut events) => self.handle_event(event).await,
                _ = watchdog(deadline) => {
                    warn!(remote = %self.remote, state = ?self.state, "Peer: negotiation timed out");
                    self.transition(NegotiationState::Failed);
                    Ok(())
                }
            };

            if let Some(rx) = self.fresh_events.take() {
                events = Some(rx);
            }
            if let Err(e) = result {
                warn!(remote = %self.remote, "Peer: negotiation failed: {e}");
                self.transition(NegotiationState::Failed);
            }
            if self.state == NegotiationState::Failed {
                break;
            }
        }

        self.release().await;
        if self.state != NegotiationState::Failed {
            self.transition(NegotiationState::Closed);
        }
        debug!(remote = %self.remote, link = self.link_id, state = ?self.state, "Peer: link stopped");
    }

    async fn handle_command(&mut self, cmd: LinkCommand) -> Result<()> {
        match cmd {
            LinkCommand::Offer => self.start_offer().await,
            LinkCommand::Signal(SignalPayload::Description(desc)) => match desc.kind {
                SdpKind::Offer => self.on_offer(desc).await,
                SdpKind::Answer => self.on_answer(desc).await,
            },
            LinkCommand::Signal(SignalPayload::Candidate { candidate }) => {
                self.on_candidate(candidate).await;
                Ok(())
            }
            LinkCommand::Attach(track) => {
                if let Some(conn) = &self.conn {
                    conn.attach_track(&track).await?;
                }
                self.tracks.insert(track.kind(), track);
                Ok(())
            }
            LinkCommand::Detach(kind) => {
                self.tracks.remove(&kind);
                if let Some(conn) = &self.conn {
                    conn.detach_track(kind).await?;
                }
                Ok(())
            }
            LinkCommand::Close => Ok(()),
        }
    }

    async fn handle_event(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::LocalCandidate(candidate) => {
                self.send_signal(SignalPayload::Candidate { candidate });
                Ok(())
            }
            LinkEvent::StateChanged(LinkState::Connected) => {
                if matches!(
                    self.state,
                    NegotiationState::Connected(IceStatus::Pending) | NegotiationState::Recovering
                ) {
                    self.deadline = None;
                    self.transition(NegotiationState::Connected(IceStatus::Up));
                }
                Ok(())
            }
            LinkEvent::StateChanged(state @ (LinkState::Disconnected | LinkState::Failed)) => {
                match self.state {
                    NegotiationState::Connected(_) => self.recover().await,
                    NegotiationState::Offering | NegotiationState::Answering
                        if state == LinkState::Failed =>
                    {
                        Err(ClientError::Negotiation("connection failed during negotiation".into()))
                    }
                    _ => Ok(()),
                }
            }
            LinkEvent::StateChanged(_) => Ok(()),
        }
    }

    async fn start_offer(&mut self) -> Result<()> {
        if self.state != NegotiationState::Idle {
            return Ok(());
        }
        self.initiator = true;
        let conn = self.open().await?;
        let offer = conn.create_offer(false).await?;
        conn.set_local_description(offer.clone()).await?;
        self.send_signal(SignalPayload::Description(offer));
        self.transition(NegotiationState::Offering);
        self.arm();
        Ok(())
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Result<()> {
        let session = sdp_session_id(&offer.sdp).map(str::to_owned);
        let mut keep_up = false;

        match self.state {
            NegotiationState::Idle => {}
            NegotiationState::Offering => {
                if self.remote < self.local {
                    info!(remote = %self.remote, "Peer: offer collision, yielding to remote");
                    self.reset().await;
                } else {
                    debug!(remote = %self.remote, "Peer: offer collision, keeping ours");
                    self.discard_candidates = true;
                    return Ok(());
                }
            }
            NegotiationState::Answering
            | NegotiationState::Connected(_)
            | NegotiationState::Recovering => {
                if self.remote_session.is_some() && session != self.remote_session {
                    info!(remote = %self.remote, "Peer: remote started a new connection");
                    self.reset().await;
                } else {
                    keep_up = self.state == NegotiationState::Connected(IceStatus::Up);
                }
            }
            NegotiationState::Failed | NegotiationState::Closed => return Ok(()),
        }

        let conn = self.open().await?;
        conn.set_remote_description(offer).await?;
        self.remote_session = session;
        self.has_remote = true;
        self.discard_candidates = false;
        self.flush_candidates(&conn).await;

        self.transition(NegotiationState::Answering);
        let answer = conn.create_answer().await?;
        conn.set_local_description(answer.clone()).await?;
        self.send_signal(SignalPayload::Description(answer));

        if keep_up {
            self.transition(NegotiationState::Connected(IceStatus::Up));
        } else {
            self.transition(NegotiationState::Connected(IceStatus::Pending));
            self.arm();
        }
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription) -> Result<()> {
        let expecting = self.initiator
            && matches!(self.state, NegotiationState::Offering | NegotiationState::Recovering);
        let Some(conn) = self.conn.clone().filter(|_| expecting) else {
            debug!(remote = %self.remote, state = ?self.state, "Peer: ignoring unexpected answer");
            return Ok(());
        };

        let session = sdp_session_id(&answer.sdp).map(str::to_owned);
        conn.set_remote_description(answer).await?;
        self.remote_session = session;
        self.has_remote = true;
        self.discard_candidates = false;
        self.flush_candidates(&conn).await;

        if self.state == NegotiationState::Offering {
            self.transition(NegotiationState::Connected(IceStatus::Pending));
        }
        Ok(())
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        if self.discard_candidates {
            return;
        }
        match &self.conn {
            Some(conn) if self.has_remote => {
                if let Err(e) = conn.add_ice_candidate(candidate).await {
                    warn!(remote = %self.remote, "Peer: rejected remote candidate: {e}");
                }
            }
            _ => self.pending.push(candidate),
        }
    }

    async fn flush_candidates(&mut self, conn: &Arc<dyn PeerConnection>) {
        for candidate in std::mem::take(&mut self.pending) {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!(remote = %self.remote, "Peer: rejected buffered candidate: {e}");
            }
        }
    }

    /// Transport-level failure on an established link. The original offerer restarts
    /// ICE; the other side waits for that offer.
    async fn recover(&mut self) -> Result<()> {
        self.transition(NegotiationState::Recovering);
        self.arm();
        if !self.initiator {
            return Ok(());
        }
        let Some(conn) = self.conn.clone() else {
            return Err(ClientError::Negotiation("no connection to restart".into()));
        };
        info!(remote = %self.remote, "Peer: restarting ICE");
        let offer = conn.create_offer(true).await?;
        conn.set_local_description(offer.clone()).await?;
        self.send_signal(SignalPayload::Description(offer));
        Ok(())
    }

    async fn open(&mut self) -> Result<Arc<dyn PeerConnection>> {
        if let Some(conn) = &self.conn {
            return Ok(Arc::clone(conn));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = self.connector.connect(self.remote, tx).await?;
        for track in self.tracks.values() {
            conn.attach_track(track).await?;
        }
        self.fresh_events = Some(rx);
        self.conn = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Drop the current connection and everything negotiated on it.
    async fn reset(&mut self) {
        self.release().await;
        self.initiator = false;
        self.has_remote = false;
        self.discard_candidates = false;
        self.remote_session = None;
        self.pending.clear();
        self.deadline = None;
        // Events of the old connection stop arriving once its receiver is replaced.
        self.fresh_events = None;
    }

    async fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(remote = %self.remote, "Peer: close failed: {e}");
            }
        }
        self.pending.clear();
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    fn send_signal(&self, payload: SignalPayload) {
        let _ = self.outbox.send(Envelope::Signal {
            target: Some(self.remote),
            sender: None,
            payload,
        });
    }

    fn transition(&mut self, state: NegotiationState) {
        if self.state == state {
            return;
        }
        debug!(remote = %self.remote, from = ?self.state, to = ?state, "Peer: state change");
        self.state = state;
        self.state_tx.send_replace(state);
        let _ = self.reports.send(LinkReport {
            remote: self.remote,
            link_id: self.link_id,
            state,
        });
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn watchdog(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
