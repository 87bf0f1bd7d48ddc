//! In-process doubles for driving the controller in tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::controller::{SessionController, SessionDeps, SessionHandle, SessionSettings};
use super::state::ReconnectPolicy;
use crate::capture::{CaptureSourceManager, SyntheticBackend};
use crate::compositor::OverlayLayout;
use crate::config::{HybridPrimary, IngestConfig};
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::media::{MediaKind, Resolution, TrackHandle};
use crate::webrtc::{
    ConnectionState, IceServer, IngestClient, IngestEndpoint, PeerConnector, PeerSession,
    PublishableStream, SdpAnswer, SdpOffer, WhipResource,
};

pub const ANSWER_SDP: &str =
    "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=sendonly\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=sendonly\r\n";

/// One `replace_track` observed by a [`MockPeer`]
#[derive(Debug, Clone)]
pub struct ReplaceCall {
    pub kind: MediaKind,
    pub label: Option<String>,
    /// Whether the outgoing track had already ended when the swap happened
    pub previous_ended: bool,
}

struct MockPeerInner {
    id: String,
    offer: SdpOffer,
    video: Mutex<Option<TrackHandle>>,
    audio: Mutex<Option<TrackHandle>>,
    replaces: Mutex<Vec<ReplaceCall>>,
    answer: Mutex<Option<String>>,
    state_tx: watch::Sender<ConnectionState>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockPeer(Arc<MockPeerInner>);

impl MockPeer {
    fn new(index: usize, stream: &PublishableStream) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::New);
        Self(Arc::new(MockPeerInner {
            id: format!("mock-peer-{}", index),
            offer: SdpOffer::new(OFFER_SDP),
            video: Mutex::new(stream.video.clone()),
            audio: Mutex::new(stream.audio.clone()),
            replaces: Mutex::new(Vec::new()),
            answer: Mutex::new(None),
            state_tx,
            closed: AtomicBool::new(false),
        }))
    }

    fn slot(&self, kind: MediaKind) -> &Mutex<Option<TrackHandle>> {
        match kind {
            MediaKind::Video => &self.0.video,
            MediaKind::Audio => &self.0.audio,
        }
    }

    pub fn attached_track(&self, kind: MediaKind) -> Option<TrackHandle> {
        self.slot(kind).lock().clone()
    }

    pub fn replaces(&self) -> Vec<ReplaceCall> {
        self.0.replaces.lock().clone()
    }

    pub fn replace_count(&self, kind: MediaKind) -> usize {
        self.0.replaces.lock().iter().filter(|c| c.kind == kind).count()
    }

    pub fn answer(&self) -> Option<String> {
        self.0.answer.lock().clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.0.state_tx.send_replace(state);
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerSession for MockPeer {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn offer(&self) -> &SdpOffer {
        &self.0.offer
    }

    async fn apply_answer(&self, answer: &str) -> Result<()> {
        let answer = SdpAnswer::parse(answer)?;
        *self.0.answer.lock() = Some(answer.sdp);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<TrackHandle>) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::InvalidState("peer closed".to_string()));
        }
        let mut slot = self.slot(kind).lock();
        self.0.replaces.lock().push(ReplaceCall {
            kind,
            label: track.as_ref().map(|t| t.label().to_string()),
            previous_ended: slot.as_ref().is_some_and(|t| t.is_ended()),
        });
        *slot = track;
        Ok(())
    }

    async fn attached(&self, kind: MediaKind) -> Option<String> {
        self.slot(kind).lock().as_ref().map(|t| t.id().to_string())
    }

    fn sender_count(&self) -> usize {
        2
    }

    fn state(&self) -> ConnectionState {
        *self.0.state_tx.borrow()
    }

    fn observe_state(&self) -> watch::Receiver<ConnectionState> {
        self.0.state_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if !self.0.closed.swap(true, Ordering::SeqCst) {
            self.0.state_tx.send_replace(ConnectionState::Closed);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<Vec<MockPeer>>,
    /// Simulated ICE gathering time before the offer is ready
    gather_delay: Mutex<Duration>,
}

impl MockConnector {
    pub fn set_gather_delay(&self, delay: Duration) {
        *self.gather_delay.lock() = delay;
    }

    pub fn opens(&self) -> usize {
        self.peers.lock().len()
    }

    /// Most recently opened peer
    pub fn last(&self) -> MockPeer {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no peer has been opened")
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn open(
        &self,
        stream: &PublishableStream,
        _ice_servers: &[IceServer],
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>> {
        let gather = *self.gather_delay.lock();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            _ = tokio::time::sleep(gather) => {}
        }
        let mut peers = self.peers.lock();
        let peer = MockPeer::new(peers.len(), stream);
        peers.push(peer.clone());
        Ok(Box::new(peer))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum IngestBehavior {
    Answer,
    Reject(u16),
    /// Hang until the client-side timeout fires
    Timeout,
    /// Never answer
    Hang,
}

/// Ingest double; answers unless a behaviour was queued
pub struct MockIngest {
    queue: Mutex<VecDeque<IngestBehavior>>,
    timeout: Duration,
    publishes: AtomicUsize,
    teardowns: AtomicUsize,
}

impl MockIngest {
    fn new(timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            timeout,
            publishes: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
        }
    }

    /// Queue the outcome of the next publish
    pub fn push(&self, behavior: IngestBehavior) {
        self.queue.lock().push_back(behavior);
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngestClient for MockIngest {
    async fn publish(&self, offer_sdp: &str, endpoint: &IngestEndpoint) -> Result<WhipResource> {
        assert!(offer_sdp.starts_with("v=0"));
        let n = self.publishes.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or(IngestBehavior::Answer);
        match behavior {
            IngestBehavior::Answer => Ok(WhipResource {
                answer_sdp: ANSWER_SDP.to_string(),
                location: endpoint.url.join(&format!("/resource/{}", n)).ok(),
                bearer_token: endpoint.bearer_token.clone(),
            }),
            IngestBehavior::Reject(status) => Err(AppError::IngestRejected {
                status: Some(status),
                body: "rejected".to_string(),
            }),
            IngestBehavior::Timeout => {
                tokio::time::sleep(self.timeout).await;
                Err(AppError::IngestTimeout(self.timeout.as_millis() as u64))
            }
            IngestBehavior::Hang => std::future::pending().await,
        }
    }

    async fn teardown(&self, _resource: &WhipResource) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running controller wired to synthetic capture and mock transport
pub struct Harness {
    pub handle: SessionHandle,
    pub backend: Arc<SyntheticBackend>,
    pub capture: Arc<CaptureSourceManager>,
    pub connector: Arc<MockConnector>,
    pub ingest: Arc<MockIngest>,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|b| b, |_| {})
    }

    pub fn with(tweak: impl FnOnce(&mut SessionSettings)) -> Self {
        Self::build(|b| b, tweak)
    }

    pub fn with_backend(configure: impl FnOnce(SyntheticBackend) -> SyntheticBackend) -> Self {
        Self::build(configure, |_| {})
    }

    fn build(
        configure: impl FnOnce(SyntheticBackend) -> SyntheticBackend,
        tweak: impl FnOnce(&mut SessionSettings),
    ) -> Self {
        let backend = Arc::new(configure(
            SyntheticBackend::new().with_frame_size(Resolution::new(32, 24)),
        ));
        let (capture, source_events) = CaptureSourceManager::new(backend.clone());
        let capture = Arc::new(capture);
        let connector = Arc::new(MockConnector::default());
        let ingest = Arc::new(MockIngest::new(Duration::from_secs(10)));
        let events = Arc::new(EventBus::new());

        let mut settings = SessionSettings {
            ingest: IngestConfig {
                base_url: "http://ingest.test".to_string(),
                stream_key: "key".to_string(),
                ..Default::default()
            },
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            compositor_fps: 30,
            hybrid_primary: HybridPrimary::Screen,
            layout: OverlayLayout::default(),
            reconnect: ReconnectPolicy::default(),
        };
        tweak(&mut settings);

        let handle = SessionController::spawn(SessionDeps {
            capture: capture.clone(),
            source_events,
            connector: connector.clone(),
            ingest: ingest.clone(),
            events: events.clone(),
            settings,
        });

        Self {
            handle,
            backend,
            capture,
            connector,
            ingest,
            events,
        }
    }
}
