//! Media lifecycle controller.
//!
//! Owns the local capture tracks. Peer links only read them through the engine, which
//! swaps the sender track per media kind without renegotiating.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use huddle_common::models::MediaFlags;
use huddle_common::protocol::NoticeCode;
use huddle_common::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::peer::PeerEngine;
use crate::room::RoomView;
use crate::rtc::{LocalTrack, MediaKind, TrackSource};
use crate::transport::Transport;

/// Local capture devices.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Acquire `source`. Fails if the device is missing or permission was refused.
    async fn open(&self, source: TrackSource) -> Result<LocalTrack>;
}

/// Something that renders one remote participant's media.
pub trait RenderSurface: Send + Sync {
    fn participant(&self) -> Uuid;
    fn detach(&self);
}

/// Capture devices that hand out empty tracks. Sources can be marked unavailable.
#[derive(Default)]
pub struct SyntheticDevices {
    unavailable: Mutex<HashSet<TrackSource>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, source: TrackSource, available: bool) {
        if let Ok(mut unavailable) = self.unavailable.lock() {
            if available {
                unavailable.remove(&source);
            } else {
                unavailable.insert(source);
            }
        }
    }
}

#[async_trait]
impl CaptureDevices for SyntheticDevices {
    async fn open(&self, source: TrackSource) -> Result<LocalTrack> {
        let missing = self
            .unavailable
            .lock()
            .map(|u| u.contains(&source))
            .unwrap_or(false);
        if missing {
            return Err(ClientError::Device(format!("{source:?} is not available")));
        }
        Ok(LocalTrack::new(source))
    }
}

pub struct MediaController {
    devices: Arc<dyn CaptureDevices>,
    outbox: mpsc::UnboundedSender<Envelope>,
    mic: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
    flags: MediaFlags,
    surfaces: Vec<Arc<dyn RenderSurface>>,
    left: bool,
}

impl MediaController {
    pub fn new(devices: Arc<dyn CaptureDevices>, outbox: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            devices,
            outbox,
            mic: None,
            camera: None,
            screen: None,
            flags: MediaFlags::default(),
            surfaces: Vec::new(),
            left: false,
        }
    }

    pub fn flags(&self) -> MediaFlags {
        self.flags
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    /// The track currently on the video sender.
    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.mic.as_ref()
    }

    /// Turn the microphone on or off. Muting keeps the track and only disables it.
    pub async fn set_mic(&mut self, on: bool, engine: &mut PeerEngine, view: &mut RoomView) -> bool {
        if !on {
            return self.mute(view);
        }
        if self.left {
            return false;
        }
        match &self.mic {
            Some(mic) => mic.set_enabled(true),
            None => {
                let Some(mic) = self.acquire(TrackSource::Microphone, view).await else {
                    return false;
                };
                engine.set_track(mic.clone());
                self.mic = Some(mic);
            }
        }

        self.flags.audio_on = true;
        self.announce(view);
        true
    }

    /// Turn the microphone off, as asked by the host's mute actions.
    pub fn mute(&mut self, view: &mut RoomView) -> bool {
        if self.left {
            return false;
        }
        if let Some(mic) = &self.mic {
            mic.set_enabled(false);
        }
        self.flags.audio_on = false;
        self.announce(view);
        true
    }

    /// Turn the camera on or off. While screen sharing the camera is kept off the wire.
    pub async fn set_camera(&mut self, on: bool, engine: &mut PeerEngine, view: &mut RoomView) -> bool {
        if self.left {
            return false;
        }
        if on {
            if self.camera.is_none() {
                let Some(camera) = self.acquire(TrackSource::Camera, view).await else {
                    return false;
                };
                if self.screen.is_none() {
                    engine.set_track(camera.clone());
                }
                self.camera = Some(camera);
            }
        } else if let Some(camera) = self.camera.take() {
            camera.stop();
            if self.screen.is_none() {
                engine.remove_track(MediaKind::Video);
            }
        }

        self.flags.video_on = on;
        self.announce(view);
        true
    }

    /// Start or stop screen sharing. A no-op for guests while the host has it disabled.
    pub async fn set_screen_share(
        &mut self,
        on: bool,
        engine: &mut PeerEngine,
        view: &mut RoomView,
    ) -> bool {
        if self.left {
            return false;
        }
        if on {
            let state = view.state();
            if !state.settings.screen_share_enabled && !state.is_host() {
                debug!("Media: screen share is disabled by the host");
                return false;
            }
            if self.screen.is_none() {
                let Some(screen) = self.acquire(TrackSource::Screen, view).await else {
                    return false;
                };
                engine.set_track(screen.clone());
                self.screen = Some(screen);
            }
            self.flags.screen_sharing = true;
            self.announce(view);
            true
        } else {
            self.stop_screen_share(engine, view)
        }
    }

    /// Stop sharing and put the camera back on the video sender, if it is on.
    pub fn stop_screen_share(&mut self, engine: &mut PeerEngine, view: &mut RoomView) -> bool {
        if self.left {
            return false;
        }
        let Some(screen) = self.screen.take() else {
            return true;
        };
        screen.stop();
        match &self.camera {
            Some(camera) => engine.set_track(camera.clone()),
            None => engine.remove_track(MediaKind::Video),
        }
        self.flags.screen_sharing = false;
        self.announce(view);
        true
    }

    /// Broadcast our media flags and mirror them locally.
    pub fn announce(&self, view: &mut RoomView) {
        view.set_own_media(self.flags);
        let _ = self.outbox.send(Envelope::MediaState {
            media: self.flags,
            user_id: None,
        });
    }

    pub fn attach_surface(&mut self, surface: Arc<dyn RenderSurface>) {
        self.surfaces.push(surface);
    }

    /// Detach the surfaces rendering `participant`.
    pub fn detach_surface(&mut self, participant: Uuid) {
        self.surfaces.retain(|surface| {
            if surface.participant() == participant {
                surface.detach();
                false
            } else {
                true
            }
        });
    }

    /// Stop every local track, detach every surface, close every peer link, then close
    /// the transport. Each step skips what an earlier partial teardown already did.
    /// Returns false if we had already left.
    pub fn leave(&mut self, engine: &mut PeerEngine, transport: &Transport) -> bool {
        if self.left {
            return false;
        }
        self.left = true;

        for track in [self.mic.take(), self.camera.take(), self.screen.take()]
            .into_iter()
            .flatten()
        {
            track.stop();
        }
        self.flags = MediaFlags::default();

        for surface in self.surfaces.drain(..) {
            surface.detach();
        }

        engine.remove_track(MediaKind::Audio);
        engine.remove_track(MediaKind::Video);
        engine.close_all();

        if !transport.is_closed() {
            transport.close();
        }
        info!("Media: left the room");
        true
    }

    async fn acquire(&self, source: TrackSource, view: &mut RoomView) -> Option<LocalTrack> {
        match self.devices.open(source).await {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(?source, "Media: continuing without device: {e}");
                view.push_notice(NoticeCode::DeviceUnavailable, e.to_string());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::rtc::MemoryConnector;
    use huddle_common::models::{AdminSettings, Participant, Role, RoomSnapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        media: MediaController,
        engine: PeerEngine,
        view: RoomView,
        outbox: mpsc::UnboundedReceiver<Envelope>,
        devices: Arc<SyntheticDevices>,
    }

    fn fixture(is_host: bool, screen_share_enabled: bool) -> Fixture {
        let me = Uuid::new_v4();
        let host = if is_host { me } else { Uuid::new_v4() };
        let mut participants = vec![Participant::new(host, "Host", Role::Host)];
        if !is_host {
            participants.push(Participant::new(me, "Me", Role::Guest));
        }
        let mut view = RoomView::new();
        view.apply_snapshot(&RoomSnapshot {
            room_id: "room".into(),
            self_id: me,
            participants,
            settings: AdminSettings {
                screen_share_enabled,
                host_id: Some(host),
                ..AdminSettings::default()
            },
            polls: Vec::new(),
            chat_history: Vec::new(),
            resumed: false,
            voted_polls: Vec::new(),
        });

        let (outbox_tx, outbox) = mpsc::unbounded_channel();
        let (mut engine, _reports) = PeerEngine::new(
            Arc::new(MemoryConnector::new()),
            outbox_tx.clone(),
            Duration::from_secs(15),
        );
        engine.set_local_id(me);
        let devices = Arc::new(SyntheticDevices::new());
        let media = MediaController::new(devices.clone(), outbox_tx);
        Fixture {
            media,
            engine,
            view,
            outbox,
            devices,
        }
    }

    struct CountingSurface {
        participant: Uuid,
        detached: AtomicUsize,
    }

    impl RenderSurface for CountingSurface {
        fn participant(&self) -> Uuid {
            self.participant
        }
        fn detach(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn mic_toggle_broadcasts_media_state() {
        let mut f = fixture(false, true);
        assert!(f.media.set_mic(true, &mut f.engine, &mut f.view).await);
        let mic = f.media.audio_track().unwrap().clone();
        assert!(mic.is_enabled());

        assert!(f.media.set_mic(false, &mut f.engine, &mut f.view).await);
        assert!(!mic.is_enabled());
        assert!(!mic.is_stopped());

        let mut sent = Vec::new();
        while let Ok(env) = f.outbox.try_recv() {
            sent.push(env);
        }
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            sent[1],
            Envelope::MediaState { media: MediaFlags { audio_on: false, .. }, user_id: None }
        ));
        assert!(!f.view.own_media().audio_on);
    }

    #[tokio::test]
    async fn screen_share_is_a_noop_when_disabled_for_guests() {
        let mut f = fixture(false, false);
        assert!(!f.media.set_screen_share(true, &mut f.engine, &mut f.view).await);
        assert!(f.media.video_track().is_none());
        assert!(f.outbox.try_recv().is_err());

        let mut host = fixture(true, false);
        assert!(host.media.set_screen_share(true, &mut host.engine, &mut host.view).await);
        assert!(host.media.flags().screen_sharing);
    }

    #[tokio::test]
    async fn screen_share_replaces_camera_and_gives_it_back() {
        let mut f = fixture(false, true);
        assert!(f.media.set_camera(true, &mut f.engine, &mut f.view).await);
        let camera = f.media.video_track().unwrap().clone();

        assert!(f.media.set_screen_share(true, &mut f.engine, &mut f.view).await);
        assert_eq!(f.media.video_track().unwrap().source(), TrackSource::Screen);

        assert!(f.media.set_screen_share(false, &mut f.engine, &mut f.view).await);
        assert_eq!(f.media.video_track(), Some(&camera));
        assert!(!f.media.flags().screen_sharing);
        assert!(f.media.flags().video_on);
    }

    #[tokio::test]
    async fn missing_device_is_reported_and_skipped() {
        let mut f = fixture(false, true);
        f.devices.set_available(TrackSource::Camera, false);

        assert!(!f.media.set_camera(true, &mut f.engine, &mut f.view).await);
        assert!(!f.media.flags().video_on);
        assert_eq!(f.view.state().notices.len(), 1);
        assert_eq!(f.view.state().notices[0].0, NoticeCode::DeviceUnavailable);

        assert!(f.media.set_mic(true, &mut f.engine, &mut f.view).await);
    }

    #[tokio::test]
    async fn leave_twice_is_the_same_as_once() {
        let mut f = fixture(false, true);
        f.media.set_mic(true, &mut f.engine, &mut f.view).await;
        f.media.set_camera(true, &mut f.engine, &mut f.view).await;
        let mic = f.media.audio_track().unwrap().clone();
        let camera = f.media.video_track().unwrap().clone();

        let remote = Uuid::new_v4();
        let surface = Arc::new(CountingSurface {
            participant: remote,
            detached: AtomicUsize::new(0),
        });
        f.media.attach_surface(surface.clone());
        f.engine.ensure_offer(remote);

        let (transport, _events) = Transport::connect_url(
            "ws://127.0.0.1:1/rooms/x/ws".into(),
            ClientConfig::new("ws://127.0.0.1:1", "http://127.0.0.1:1", "t").timing(),
        );

        assert!(f.media.leave(&mut f.engine, &transport));
        assert!(!f.media.leave(&mut f.engine, &transport));

        assert!(mic.is_stopped() && camera.is_stopped());
        assert_eq!(surface.detached.load(Ordering::SeqCst), 1);
        assert!(f.engine.is_empty());
        assert!(transport.is_closed());
        assert!(!f.media.set_mic(true, &mut f.engine, &mut f.view).await);
    }

    #[tokio::test]
    async fn surfaces_detach_per_participant() {
        let mut f = fixture(false, true);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let sa = Arc::new(CountingSurface {
            participant: a,
            detached: AtomicUsize::new(0),
        });
        let sb = Arc::new(CountingSurface {
            participant: b,
            detached: AtomicUsize::new(0),
        });
        f.media.attach_surface(sa.clone());
        f.media.attach_surface(sb.clone());

        f.media.detach_surface(a);
        assert_eq!(sa.detached.load(Ordering::SeqCst), 1);
        assert_eq!(sb.detached.load(Ordering::SeqCst), 0);
    }
}
