//! Publish-only peer session
//!
//! A session always carries exactly one audio and one video sender. Senders
//! without a source at open time are placeholders; later sources are
//! attached with `replace_track`, which never renegotiates.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

use super::encoder::VideoEncoderFactory;
use super::ice::IceServer;
use super::sender::{new_local_track, SenderPump};
use super::signaling::{ConnectionState, SdpAnswer, SdpOffer};
use crate::error::{AppError, Result};
use crate::media::{MediaKind, Resolution, TrackHandle};

/// Track set handed to the peer session
#[derive(Debug, Clone, Default)]
pub struct PublishableStream {
    pub video: Option<TrackHandle>,
    pub audio: Option<TrackHandle>,
}

impl PublishableStream {
    pub fn new(video: Option<TrackHandle>, audio: Option<TrackHandle>) -> Self {
        Self { video, audio }
    }

    pub fn track(&self, kind: MediaKind) -> Option<&TrackHandle> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    fn id(&self) -> &str;

    /// Final local offer (ICE gathering already done)
    fn offer(&self) -> &SdpOffer;

    /// Complete the handshake with the ingest's answer
    async fn apply_answer(&self, answer: &str) -> Result<()>;

    /// Swap the source behind the sender of `kind`; `None` parks the sender
    async fn replace_track(&self, kind: MediaKind, track: Option<TrackHandle>) -> Result<()>;

    /// Id of the source currently attached to `kind`
    async fn attached(&self, kind: MediaKind) -> Option<String>;

    /// Always two: one audio, one video
    fn sender_count(&self) -> usize;

    fn state(&self) -> ConnectionState;

    fn observe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Idempotent teardown of the transport and every sender
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a session, attach `stream` and build the final offer
    async fn open(
        &self,
        stream: &PublishableStream,
        ice_servers: &[IceServer],
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>>;
}

/// Encoding and gathering parameters for real sessions
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    pub ice_gathering_timeout: Duration,
    pub output: Resolution,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            ice_gathering_timeout: Duration::from_millis(5000),
            output: Resolution::HD720,
            fps: 30,
            bitrate_kbps: 2500,
        }
    }
}

/// webrtc-rs backed connector
pub struct RtcPeerConnector {
    settings: PeerSettings,
    encoders: Arc<dyn VideoEncoderFactory>,
}

impl RtcPeerConnector {
    pub fn new(settings: PeerSettings, encoders: Arc<dyn VideoEncoderFactory>) -> Self {
        Self { settings, encoders }
    }

    async fn new_peer_connection(&self, ice_servers: &[IceServer]) -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(IceServer::to_rtc).collect(),
            ..Default::default()
        };

        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create peer connection: {}", e)))
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn open(
        &self,
        stream: &PublishableStream,
        ice_servers: &[IceServer],
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>> {
        let pc = Arc::new(self.new_peer_connection(ice_servers).await?);
        let session_id = uuid::Uuid::new_v4().to_string();

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let state_tx = Arc::new(state_tx);
        {
            let state_tx = state_tx.clone();
            let session_id = session_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    if let Some(state) = ConnectionState::from_rtc(s) {
                        info!("Peer {} connection state: {}", session_id, state);
                        let _ = state_tx.send(state);
                    }
                })
            }));
        }

        let session = RtcPeerSession {
            id: session_id,
            pc: pc.clone(),
            offer: SdpOffer::new(String::new()),
            audio: Mutex::new(SenderSlot::placeholder(&pc, MediaKind::Audio).await?),
            video: Mutex::new(SenderSlot::placeholder(&pc, MediaKind::Video).await?),
            state_tx,
            state_rx,
            closed: AtomicBool::new(false),
            settings: self.settings,
            encoders: self.encoders.clone(),
        };

        let result = async {
            for kind in [MediaKind::Audio, MediaKind::Video] {
                if let Some(track) = stream.track(kind) {
                    session.attach(kind, Some(track.clone())).await?;
                }
            }
            session.create_offer(cancel).await
        }
        .await;

        match result {
            Ok(offer) => Ok(Box::new(RtcPeerSession { offer, ..session })),
            Err(e) => {
                let _ = session.close().await;
                Err(e)
            }
        }
    }
}

struct SenderSlot {
    kind: MediaKind,
    sender: Arc<RTCRtpSender>,
    source: Option<TrackHandle>,
    pump: Option<SenderPump>,
}

impl SenderSlot {
    /// Add a send-only transceiver with no track bound yet
    async fn placeholder(pc: &RTCPeerConnection, kind: MediaKind) -> Result<Self> {
        let transceiver = pc
            .add_transceiver_from_kind(
                kind.into(),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e)))?;

        Ok(Self {
            kind,
            sender: transceiver.sender().await,
            source: None,
            pump: None,
        })
    }
}

pub struct RtcPeerSession {
    id: String,
    pc: Arc<RTCPeerConnection>,
    offer: SdpOffer,
    audio: Mutex<SenderSlot>,
    video: Mutex<SenderSlot>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    closed: AtomicBool,
    settings: PeerSettings,
    encoders: Arc<dyn VideoEncoderFactory>,
}

impl RtcPeerSession {
    fn slot(&self, kind: MediaKind) -> &Mutex<SenderSlot> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    async fn create_offer(&self, cancel: &CancellationToken) -> Result<SdpOffer> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to create offer: {}", e)))?;

        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.map_err(|e| {
            AppError::NegotiationFailed(format!("Failed to set local description: {}", e))
        })?;

        tokio::select! {
            _ = gathering_complete.recv() => {
                debug!("ICE gathering complete for {}", self.id);
            }
            _ = tokio::time::sleep(self.settings.ice_gathering_timeout) => {
                warn!(
                    "ICE gathering not complete after {:?}, sending offer with candidates so far",
                    self.settings.ice_gathering_timeout
                );
            }
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::NegotiationFailed("No local description".to_string()))?;
        let offer = SdpOffer::new(local.sdp);
        info!(
            "Offer ready for {} ({} media sections, {} candidates)",
            self.id,
            offer.media_sections(),
            offer.candidate_count()
        );
        Ok(offer)
    }

    /// Bind `track` to the sender of `kind`, starting its pump before the
    /// previous one is stopped
    async fn attach(&self, kind: MediaKind, track: Option<TrackHandle>) -> Result<()> {
        if let Some(t) = &track {
            if t.kind() != kind {
                return Err(AppError::InvalidState(format!(
                    "cannot attach a {} track to the {} sender",
                    t.kind(),
                    kind
                )));
            }
        }

        let mut slot = self.slot(kind).lock().await;

        let (local, pump) = match &track {
            Some(source) => {
                let local = new_local_track(kind);
                let pump = match kind {
                    MediaKind::Video => {
                        let encoder = self.encoders.create(
                            self.settings.output,
                            self.settings.fps,
                            self.settings.bitrate_kbps,
                        )?;
                        SenderPump::video(source.clone(), local.clone(), encoder, self.settings.fps)
                    }
                    MediaKind::Audio => SenderPump::audio(source.clone(), local.clone()),
                };
                (Some(local as Arc<dyn TrackLocal + Send + Sync>), Some(pump))
            }
            None => (None, None),
        };

        slot.sender
            .replace_track(local)
            .await
            .map_err(|e| AppError::WebRtcError(format!("replace_track({}) failed: {}", kind, e)))?;

        let previous = std::mem::replace(&mut slot.pump, pump);
        slot.source = track;
        drop(slot);

        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn offer(&self) -> &SdpOffer {
        &self.offer
    }

    async fn apply_answer(&self, answer: &str) -> Result<()> {
        let answer = SdpAnswer::parse(answer)?;
        let description = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::NegotiationFailed(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| AppError::NegotiationFailed(format!("Failed to apply answer: {}", e)))?;
        info!("Answer applied for {}", self.id);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<TrackHandle>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState("peer session is closed".to_string()));
        }
        debug!(
            "Replacing {} track on {} with {:?}",
            kind,
            self.id,
            track.as_ref().map(|t| t.label())
        );
        self.attach(kind, track).await
    }

    async fn attached(&self, kind: MediaKind) -> Option<String> {
        self.slot(kind)
            .lock()
            .await
            .source
            .as_ref()
            .map(|t| t.id().to_string())
    }

    fn sender_count(&self) -> usize {
        2
    }

    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn observe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let mut slot = self.slot(kind).lock().await;
            slot.source = None;
            if let Some(pump) = slot.pump.take() {
                pump.stop().await;
            }
            debug!("Closed {} sender on {}", slot.kind, self.id);
        }

        let result = self
            .pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)));
        let _ = self.state_tx.send(ConnectionState::Closed);
        info!("Peer session {} closed", self.id);
        result
    }
}

impl From<MediaKind> for webrtc::rtp_transceiver::rtp_codec::RTPCodecType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::Audio,
            MediaKind::Video => Self::Video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::encoder::FakeEncoderFactory;

    fn connector() -> RtcPeerConnector {
        RtcPeerConnector::new(
            PeerSettings {
                ice_gathering_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            Arc::new(FakeEncoderFactory),
        )
    }

    async fn open(stream: PublishableStream) -> Box<dyn PeerSession> {
        connector()
            .open(&stream, &[], &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_offer_has_two_sendonly_sections_without_tracks() {
        let session = open(PublishableStream::default()).await;
        let sdp = &session.offer().sdp;
        assert_eq!(session.offer().media_sections(), 2);
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("m=video"));
        assert!(!sdp.contains("a=recvonly"));
        assert!(!sdp.contains("a=sendrecv"));
        assert_eq!(session.sender_count(), 2);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_track_keeps_sender_count() {
        let camera = TrackHandle::new(MediaKind::Video, "camera");
        let mic = TrackHandle::new(MediaKind::Audio, "mic");
        let session = open(PublishableStream::new(Some(camera.clone()), Some(mic.clone()))).await;
        let offer_before = session.offer().clone();

        assert_eq!(session.attached(MediaKind::Video).await, Some(camera.id().to_string()));

        let screen = TrackHandle::new(MediaKind::Video, "screen");
        session.replace_track(MediaKind::Video, Some(screen.clone())).await.unwrap();
        assert_eq!(session.attached(MediaKind::Video).await, Some(screen.id().to_string()));
        assert_eq!(session.attached(MediaKind::Audio).await, Some(mic.id().to_string()));

        session.replace_track(MediaKind::Audio, None).await.unwrap();
        assert_eq!(session.attached(MediaKind::Audio).await, None);

        assert_eq!(session.sender_count(), 2);
        assert_eq!(session.offer(), &offer_before);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_kind_is_rejected() {
        let session = open(PublishableStream::default()).await;
        let mic = TrackHandle::new(MediaKind::Audio, "mic");
        let err = session
            .replace_track(MediaKind::Video, Some(mic))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_answer_is_negotiation_failure() {
        let session = open(PublishableStream::default()).await;
        let err = session.apply_answer("").await.unwrap_err();
        assert!(matches!(err, AppError::NegotiationFailed(_)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_from_remote_peer_applies() {
        let session = open(PublishableStream::default()).await;

        let remote = connector().new_peer_connection(&[]).await.unwrap();
        remote
            .set_remote_description(RTCSessionDescription::offer(session.offer().sdp.clone()).unwrap())
            .await
            .unwrap();
        let answer = remote.create_answer(None).await.unwrap();
        remote.set_local_description(answer.clone()).await.unwrap();

        session.apply_answer(&answer.sdp).await.unwrap();
        session.close().await.unwrap();
        remote.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = open(PublishableStream::default()).await;
        let mut state = session.observe_state();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
        let err = session
            .replace_track(MediaKind::Video, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_gathering() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let connector = RtcPeerConnector::new(
            PeerSettings {
                ice_gathering_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            Arc::new(FakeEncoderFactory),
        );
        // Gathering may already be complete for host-only candidates; either
        // outcome must leave nothing open and never hang.
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            connector.open(&PublishableStream::default(), &[], &cancel),
        )
        .await
        .unwrap();
        if let Err(e) = result {
            assert!(matches!(e, AppError::Cancelled));
        }
    }
}
