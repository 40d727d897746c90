//! Peer-connection seam.
//!
//! The negotiation engine drives connections only through [`PeerConnector`] and
//! [`PeerConnection`]. [`native::WebRtcConnector`] backs them with the `webrtc` crate;
//! [`memory::MemoryConnector`] completes negotiation in-process without media, for
//! headless clients and tests.

pub mod memory;
pub mod native;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use async_trait::async_trait;
use huddle_common::protocol::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

pub use memory::MemoryConnector;
pub use native::WebRtcConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Where a local track's frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Microphone => MediaKind::Audio,
            Self::Camera | Self::Screen => MediaKind::Video,
        }
    }
}

/// Connection state as reported by the platform stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks from a connection, delivered on the channel given to [`PeerConnector::connect`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    LocalCandidate(IceCandidate),
    StateChanged(LinkState),
}

/// A local capture track.
///
/// Cloning shares the track. Capture code writes samples into [`LocalTrack::rtc_track`];
/// peer connections only read from it.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(source: TrackSource) -> Self {
        let id = format!("{}-{}", source_label(source), Uuid::new_v4().simple());
        let mime_type = match source.kind() {
            MediaKind::Audio => "audio/opus",
            MediaKind::Video => "video/VP8",
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            "huddle".to_owned(),
        ));
        Self {
            inner: Arc::new(TrackInner {
                id,
                source,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                rtc,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire) && !self.is_stopped()
    }

    /// Mute/unmute without renegotiation. A disabled track sends silence/black frames.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Release the capture device. Irreversible; safe to call twice.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.inner.rtc)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PartialEq for LocalTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn source_label(source: TrackSource) -> &'static str {
    match source {
        TrackSource::Microphone => "mic",
        TrackSource::Camera => "cam",
        TrackSource::Screen => "screen",
    }
}

/// One peer connection to one remote participant.
///
/// Every connection has one outbound sender per [`MediaKind`] from the start, so
/// attaching or swapping a track never needs renegotiation.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    /// Fails if no remote description is set yet; callers buffer until then.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    /// Put `track` on the sender for its kind, replacing whatever was there.
    async fn attach_track(&self, track: &LocalTrack) -> Result<()>;
    /// Leave the sender for `kind` without a track.
    async fn detach_track(&self, kind: MediaKind) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Factory for [`PeerConnection`]s.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Open a connection to `remote`. Local candidates and state changes are reported on
    /// `events` for as long as the connection lives.
    async fn connect(
        &self,
        remote: Uuid,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// The SDP session id (second field of the `o=` line). It stays the same across
/// renegotiations of one connection and changes when the remote starts a new one.
pub fn sdp_session_id(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o="))
        .and_then(|origin| origin.split_whitespace().nth(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_comes_from_origin_line() {
        let sdp = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n";
        assert_eq!(sdp_session_id(sdp), Some("4611731400430051336"));
        assert_eq!(sdp_session_id("v=0\r\n"), None);
    }

    #[test]
    fn stopped_tracks_are_never_enabled() {
        let track = LocalTrack::new(TrackSource::Microphone);
        assert_eq!(track.kind(), MediaKind::Audio);
        assert!(track.is_enabled());
        track.stop();
        track.set_enabled(true);
        assert!(!track.is_enabled());
    }

    #[test]
    fn screen_is_a_video_source() {
        assert_eq!(TrackSource::Screen.kind(), MediaKind::Video);
        assert_ne!(LocalTrack::new(TrackSource::Screen), LocalTrack::new(TrackSource::Screen));
    }
}
