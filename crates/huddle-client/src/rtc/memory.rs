//! In-process peer connections.
//!
//! Produces syntactically plausible SDP and one host candidate per local description,
//! and reports `Connected` as soon as an offer/answer pair is complete. No media flows.
//! Like a real stack it refuses remote candidates before a remote description is set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use huddle_common::protocol::{IceCandidate, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{LinkEvent, LinkState, LocalTrack, MediaKind, PeerConnection, PeerConnector};
use crate::error::{ClientError, Result};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Creates [`MemoryConnection`]s and keeps them around for inspection.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    connections: Arc<Mutex<HashMap<Uuid, Vec<Arc<MemoryConnection>>>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection opened to `remote`, oldest first.
    pub fn connections(&self, remote: Uuid) -> Vec<Arc<MemoryConnection>> {
        self.lock().get(&remote).cloned().unwrap_or_default()
    }

    /// The newest connection to `remote`.
    pub fn latest(&self, remote: Uuid) -> Option<Arc<MemoryConnection>> {
        self.lock().get(&remote).and_then(|v| v.last().cloned())
    }

    /// Simulate a transport-level failure on the newest connection to `remote`.
    pub fn fail(&self, remote: Uuid) -> bool {
        match self.latest(remote) {
            Some(conn) => {
                conn.report(LinkState::Failed);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Arc<MemoryConnection>>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PeerConnector for MemoryConnector {
    async fn connect(
        &self,
        remote: Uuid,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let conn = Arc::new(MemoryConnection::new(remote, events));
        self.lock().entry(remote).or_default().push(Arc::clone(&conn));
        Ok(conn)
    }
}

#[derive(Default)]
struct MemoryState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    /// An offer/answer pair has completed since the last offer.
    negotiated: bool,
    sdp_version: u64,
    ice_generation: u32,
    candidates: Vec<IceCandidate>,
    tracks: HashMap<MediaKind, String>,
    closed: bool,
}

pub struct MemoryConnection {
    remote: Uuid,
    session_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: Mutex<MemoryState>,
}

impl MemoryConnection {
    fn new(remote: Uuid, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        let _ = events.send(LinkEvent::StateChanged(LinkState::New));
        Self {
            remote,
            session_id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            events,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, state: LinkState) {
        let _ = self.events.send(LinkEvent::StateChanged(state));
    }

    fn describe(&self, kind: SdpKind, state: &mut MemoryState) -> SessionDescription {
        state.sdp_version += 1;
        let sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=huddle-memory\r\nt=0 0\r\na=ice-ufrag:m{}g{}\r\n",
            self.session_id, state.sdp_version, self.session_id, state.ice_generation
        );
        SessionDescription { kind, sdp }
    }

    fn ensure_open(state: &MemoryState) -> Result<()> {
        if state.closed {
            return Err(ClientError::Negotiation("connection is closed".into()));
        }
        Ok(())
    }

    /// Remote candidates applied so far, in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().candidates.clone()
    }

    /// Track ids currently on each sender.
    pub fn attached_tracks(&self) -> HashMap<MediaKind, String> {
        self.lock().tracks.clone()
    }

    pub fn ice_generation(&self) -> u32 {
        self.lock().ice_generation
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn remote(&self) -> Uuid {
        self.remote
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        if ice_restart {
            state.ice_generation += 1;
        }
        Ok(self.describe(SdpKind::Offer, &mut state))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        match &state.remote {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(self.describe(SdpKind::Answer, &mut state)),
            _ => Err(ClientError::Negotiation("no remote offer to answer".into())),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let completed = {
            let mut state = self.lock();
            Self::ensure_open(&state)?;
            let kind = description.kind;
            state.local = Some(description);
            state.negotiated = kind == SdpKind::Answer;
            state.negotiated
        };

        let _ = self.events.send(LinkEvent::LocalCandidate(IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                self.session_id,
                40_000 + (self.session_id % 20_000)
            ),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }));

        if completed {
            self.report(LinkState::Connected);
        } else {
            self.report(LinkState::Connecting);
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let completed = {
            let mut state = self.lock();
            Self::ensure_open(&state)?;
            let kind = description.kind;
            if kind == SdpKind::Answer
                && !state.local.as_ref().is_some_and(|l| l.kind == SdpKind::Offer)
            {
                return Err(ClientError::Negotiation("answer without a local offer".into()));
            }
            state.remote = Some(description);
            state.negotiated = kind == SdpKind::Answer;
            state.negotiated
        };
        if completed {
            self.report(LinkState::Connected);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        if state.remote.is_none() {
            return Err(ClientError::Negotiation("remote description not set".into()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_open(&state)?;
        state.tracks.insert(track.kind(), track.id().to_owned());
        Ok(())
    }

    async fn detach_track(&self, kind: MediaKind) -> Result<()> {
        let mut state = self.lock();
        state.tracks.remove(&kind);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let was_open = {
            let mut state = self.lock();
            let was_open = !state.closed;
            state.closed = true;
            state.tracks.clear();
            was_open
        };
        if was_open {
            self.report(LinkState::Closed);
        }
        Ok(())
    }
}
