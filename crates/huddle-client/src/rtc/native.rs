//! [`PeerConnector`] backed by the `webrtc` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use huddle_common::protocol::{IceCandidate, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use super::{LinkEvent, LinkState, LocalTrack, MediaKind, PeerConnection, PeerConnector};
use crate::error::{ClientError, Result};

pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        remote: Uuid,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(self.api.new_peer_connection(self.configuration()).await?);

        // One sendrecv transceiver per kind up front; later track swaps use replace_track.
        let mut senders = HashMap::new();
        for (kind, codec) in [
            (MediaKind::Audio, RTPCodecType::Audio),
            (MediaKind::Video, RTPCodecType::Video),
        ] {
            let transceiver = pc
                .add_transceiver_from_kind(
                    codec,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Sendrecv,
                        send_encodings: vec![],
                    }),
                )
                .await?;
            senders.insert(kind, transceiver.sender().await);
        }

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(LinkEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => tracing::warn!(%remote, "Failed to serialize ICE candidate: {e}"),
                }
            })
        }));

        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                tracing::debug!(%remote, %state, "Peer connection state changed");
                let _ = tx.send(LinkEvent::StateChanged(link_state(state)));
            })
        }));

        Ok(Arc::new(WebRtcConnection { pc, senders }))
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    senders: HashMap<MediaKind, Arc<RTCRtpSender>>,
}

impl WebRtcConnection {
    fn sender(&self, kind: MediaKind) -> Result<&Arc<RTCRtpSender>> {
        self.senders
            .get(&kind)
            .ok_or_else(|| ClientError::Negotiation(format!("no {kind:?} sender")))
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            voice_activity_detection: false,
        };
        let offer = self.pc.create_offer(Some(options)).await?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<()> {
        let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
        self.sender(track.kind())?.replace_track(Some(rtc)).await?;
        Ok(())
    }

    async fn detach_track(&self, kind: MediaKind) -> Result<()> {
        self.sender(kind)?.replace_track(None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(ClientError::Negotiation(format!(
                "unsupported description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn generated_sdp() -> String {
        let connector = WebRtcConnector::new(Vec::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = connector.connect(Uuid::new_v4(), tx).await.unwrap();
        let sdp = conn.create_offer(false).await.unwrap().sdp;
        conn.close().await.unwrap();
        sdp
    }

    #[tokio::test]
    async fn description_conversion_keeps_kind() {
        let sdp = generated_sdp().await;

        let rtc = to_rtc(SessionDescription::answer(sdp.clone())).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);
        let back = from_rtc(rtc).unwrap();
        assert_eq!(back.kind, SdpKind::Answer);
        assert_eq!(back.sdp, sdp);

        let offer = from_rtc(to_rtc(SessionDescription::offer(sdp.clone())).unwrap()).unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
    }

    #[test]
    fn failure_states_map_through() {
        assert_eq!(link_state(RTCPeerConnectionState::Failed), LinkState::Failed);
        assert_eq!(link_state(RTCPeerConnectionState::Disconnected), LinkState::Disconnected);
        assert_eq!(link_state(RTCPeerConnectionState::Connected), LinkState::Connected);
    }

    #[tokio::test]
    async fn connector_builds_with_default_codecs() {
        let connector = WebRtcConnector::new(Vec::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = connector.connect(Uuid::new_v4(), tx).await.unwrap();
        let offer = conn.create_offer(false).await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        conn.close().await.unwrap();
    }
}
