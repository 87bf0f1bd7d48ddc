//! Session controller
//!
//! A single actor task owns every live resource: captured sources, the
//! compositor, the peer session and the ingest resource. Host commands
//! arrive over an mpsc channel and are handled one at a time, so no two
//! state transitions ever interleave. Only `stop()` reaches around the
//! queue, by cancelling the operation currently in flight.

use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{ReconnectPolicy, SessionState, SessionStatus, SourceMode};
use crate::capture::{CaptureConstraints, CaptureSource, CaptureSourceManager, SourceEvent, SourceKind};
use crate::compositor::{Compositor, CompositorSettings, OverlayLayout};
use crate::config::{AppConfig, ConfigStore, HybridPrimary, IngestConfig};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::media::{MediaKind, TrackHandle};
use crate::webrtc::{
    ConnectionState, IceServer, IngestClient, IngestEndpoint, PeerConnector, PeerSession,
    PublishableStream, WhipResource,
};

const COMMAND_QUEUE: usize = 32;

/// Controller tuning taken from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Where and how to publish
    pub ingest: IngestConfig,
    pub ice_servers: Vec<IceServer>,
    /// Output frame rate of the PiP compositor
    pub compositor_fps: u32,
    /// Which source fills the full frame in hybrid mode
    pub hybrid_primary: HybridPrimary,
    /// Overlay corner and size used when a session starts
    pub layout: OverlayLayout,
    pub reconnect: ReconnectPolicy,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ingest: config.ingest.clone(),
            ice_servers: IceServer::from_config(&config.webrtc),
            compositor_fps: config.compositor.fps,
            hybrid_primary: config.compositor.hybrid_primary,
            layout: config.compositor.layout,
            reconnect: ReconnectPolicy::from(&config.reconnect),
        }
    }
}

/// Collaborators handed to [`SessionController::spawn`]
pub struct SessionDeps {
    pub capture: Arc<CaptureSourceManager>,
    pub source_events: mpsc::UnboundedReceiver<SourceEvent>,
    pub connector: Arc<dyn PeerConnector>,
    pub ingest: Arc<dyn IngestClient>,
    pub events: Arc<EventBus>,
    pub settings: SessionSettings,
}

enum Command {
    Start {
        mode: SourceMode,
        constraints: CaptureConstraints,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Switch {
        mode: SourceMode,
        reply: oneshot::Sender<Result<()>>,
    },
    Layout {
        layout: OverlayLayout,
        reply: oneshot::Sender<Result<()>>,
    },
    Toggle {
        kind: MediaKind,
        reply: oneshot::Sender<Result<bool>>,
    },
    Reconfigure {
        settings: Box<SessionSettings>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable front-end to the controller actor
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    operation: Arc<Mutex<CancellationToken>>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| AppError::Internal("session controller is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("session controller dropped the request".to_string()))?
    }

    /// Acquire sources for `mode`, negotiate and go live
    pub async fn start(&self, mode: SourceMode, constraints: CaptureConstraints) -> Result<()> {
        self.request(|reply| Command::Start {
            mode,
            constraints,
            reply,
        })
        .await
    }

    /// Abandon whatever is in flight and release everything
    pub async fn stop(&self) -> Result<()> {
        self.operation.lock().cancel();
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Change the published source without renegotiating
    pub async fn switch_source(&self, mode: SourceMode) -> Result<()> {
        self.request(|reply| Command::Switch { mode, reply }).await
    }

    pub async fn update_layout(&self, layout: OverlayLayout) -> Result<()> {
        self.request(|reply| Command::Layout { layout, reply }).await
    }

    /// Returns the new enabled flag
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| Command::Toggle {
            kind: MediaKind::Video,
            reply,
        })
        .await
    }

    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| Command::Toggle {
            kind: MediaKind::Audio,
            reply,
        })
        .await
    }

    /// Replace the controller settings
    ///
    /// Ingest, ICE and reconnect settings apply from the next start or
    /// reconnect; a running session keeps the peer it has.
    pub async fn reconfigure(&self, settings: SessionSettings) -> Result<()> {
        self.request(|reply| Command::Reconfigure {
            settings: Box::new(settings),
            reply,
        })
        .await
    }

    /// Keep the controller settings in step with `store`
    ///
    /// The returned task ends when the store or the controller goes away.
    pub fn follow_config(&self, store: ConfigStore) -> JoinHandle<()> {
        let handle = self.clone();
        let mut changes = store.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => debug!("Config changed ({}), updating session settings", change.key),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let settings = SessionSettings::from_config(&store.get());
                if let Err(e) = handle.reconfigure(settings).await {
                    warn!("Failed to apply config to the session: {}", e);
                    break;
                }
            }
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

/// The actor behind [`SessionHandle`]
pub struct SessionController {
    capture: Arc<CaptureSourceManager>,
    connector: Arc<dyn PeerConnector>,
    ingest: Arc<dyn IngestClient>,
    events: Arc<EventBus>,
    settings: SessionSettings,

    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    operation: Arc<Mutex<CancellationToken>>,

    camera: Option<CaptureSource>,
    screen: Option<CaptureSource>,
    compositor: Option<Compositor>,
    peer: Option<Box<dyn PeerSession>>,
    resource: Option<WhipResource>,
    peer_state: Option<watch::Receiver<ConnectionState>>,
    reconnect_at: Option<Instant>,
}

impl SessionController {
    /// Spawn the actor on the current runtime
    pub fn spawn(deps: SessionDeps) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let status = SessionStatus {
            layout: deps.settings.layout,
            ..Default::default()
        };
        let (status_tx, status_rx) = watch::channel(status.clone());
        let operation = Arc::new(Mutex::new(CancellationToken::new()));

        let controller = SessionController {
            capture: deps.capture,
            connector: deps.connector,
            ingest: deps.ingest,
            events: deps.events,
            settings: deps.settings,
            status,
            status_tx,
            operation: operation.clone(),
            camera: None,
            screen: None,
            compositor: None,
            peer: None,
            resource: None,
            peer_state: None,
            reconnect_at: None,
        };
        tokio::spawn(controller.run(commands_rx, deps.source_events));

        SessionHandle {
            commands: commands_tx,
            status: status_rx,
            operation,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut source_events: mpsc::UnboundedReceiver<SourceEvent>,
    ) {
        info!("Session controller started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(event) = source_events.recv() => self.on_source_event(event).await,
                state = peer_state_changed(&mut self.peer_state) => match state {
                    Some(state) => self.on_peer_state(state).await,
                    None => self.peer_state = None,
                },
                _ = reconnect_due(self.reconnect_at) => self.reconnect().await,
            }
        }
        self.teardown().await;
        info!("Session controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                mode,
                constraints,
                reply,
            } => {
                let _ = reply.send(self.start(mode, constraints).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Command::Switch { mode, reply } => {
                let _ = reply.send(self.switch_source(mode).await);
            }
            Command::Layout { layout, reply } => {
                let _ = reply.send(self.update_layout(layout).await);
            }
            Command::Toggle { kind, reply } => {
                let _ = reply.send(Ok(self.toggle(kind)));
            }
            Command::Reconfigure { settings, reply } => {
                self.reconfigure(*settings);
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------

    async fn start(&mut self, mode: SourceMode, constraints: CaptureConstraints) -> Result<()> {
        if !self.status.state.can_start() {
            return Err(AppError::InvalidState(format!(
                "cannot start while {}",
                self.status.state
            )));
        }
        if let Err(e) = IngestEndpoint::resolve(&self.settings.ingest) {
            self.events.publish_error(&e, false);
            return Err(e);
        }

        if self.holds_resources() {
            // A pending reconnect still owns the previous sources
            debug!("Discarding resources of the previous session");
            self.teardown().await;
        }

        info!(
            "Starting session: mode={}, {} @ {} fps",
            mode,
            constraints.resolution,
            constraints.effective_fps()
        );
        self.reconnect_at = None;
        self.status.mode = Some(mode);
        self.status.constraints = Some(constraints);
        self.status.error = None;
        self.status.reconnect_attempts = 0;
        self.set_state(SessionState::Initializing);

        let token = self.new_operation();
        match self.bring_up(mode, &constraints, &token).await {
            Ok(()) => {
                self.set_state(SessionState::Live);
                info!("Session live ({})", mode);
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                if matches!(e, AppError::Cancelled) {
                    info!("Session start abandoned");
                    self.status.mode = None;
                    self.set_state(SessionState::Stopped);
                } else {
                    self.surface_error(&e, true);
                    self.set_state(SessionState::Error);
                }
                Err(e)
            }
        }
    }

    async fn bring_up(
        &mut self,
        mode: SourceMode,
        constraints: &CaptureConstraints,
        token: &CancellationToken,
    ) -> Result<()> {
        for kind in [SourceKind::Camera, SourceKind::Screen] {
            if mode.uses(kind) {
                self.acquire(kind, constraints, token).await?;
            }
        }
        if mode == SourceMode::Hybrid {
            self.start_compositor()?;
        }
        self.apply_enabled();
        self.connect(token).await
    }

    async fn stop(&mut self) -> Result<()> {
        if matches!(self.status.state, SessionState::Idle | SessionState::Stopped)
            && self.peer.is_none()
        {
            return Ok(());
        }
        let was = self.status.state;
        self.teardown().await;
        self.set_state(SessionState::Stopped);
        info!("Session stopped (was {})", was);
        Ok(())
    }

    /// Release every resource in dependency order
    async fn teardown(&mut self) {
        self.reconnect_at = None;
        self.close_peer().await;
        if let Some(mut compositor) = self.compositor.take() {
            compositor.stop().await;
        }
        for kind in [SourceKind::Camera, SourceKind::Screen] {
            self.release_source(kind);
        }
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Open a peer for the current mode and publish it to the ingest
    async fn connect(&mut self, token: &CancellationToken) -> Result<()> {
        let endpoint = IngestEndpoint::resolve(&self.settings.ingest)?;
        let stream = self.stream_for(self.status.mode.unwrap_or_default());
        let peer = self
            .connector
            .open(&stream, &self.settings.ice_servers, token)
            .await?;
        debug!(
            "Peer {} offer ready ({} media sections)",
            peer.id(),
            peer.offer().media_sections()
        );

        let ingest = self.ingest.clone();
        let exchange = async {
            let resource = cancellable(token, ingest.publish(&peer.offer().sdp, &endpoint)).await?;
            if let Err(e) = peer.apply_answer(&resource.answer_sdp).await {
                ingest.teardown(&resource).await;
                return Err(e);
            }
            Ok(resource)
        }
        .await;

        match exchange {
            Ok(resource) => {
                info!("Peer {} published to {}", peer.id(), endpoint.url);
                self.peer_state = Some(peer.observe_state());
                self.status.peer_id = Some(peer.id().to_string());
                self.status.connection = Some(peer.state());
                self.peer = Some(peer);
                self.resource = Some(resource);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    warn!("Failed to close peer {}: {}", peer.id(), close_err);
                }
                Err(e)
            }
        }
    }

    async fn close_peer(&mut self) {
        self.peer_state = None;
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer {}: {}", peer.id(), e);
            }
        }
        if let Some(resource) = self.resource.take() {
            let ingest = self.ingest.clone();
            tokio::spawn(async move { ingest.teardown(&resource).await });
        }
        self.status.peer_id = None;
        self.status.connection = None;
    }

    // ------------------------------------------------------------------
    // Live changes
    // ------------------------------------------------------------------

    async fn switch_source(&mut self, mode: SourceMode) -> Result<()> {
        if self.status.state != SessionState::Live {
            return Err(AppError::InvalidState(format!(
                "cannot switch source while {}",
                self.status.state
            )));
        }
        let from = self.status.mode;
        // Same mode is a no-op unless one of its sources was lost and parked
        if from == Some(mode) && self.sources_ready(mode) {
            return Ok(());
        }

        info!(
            "Switching source: {} -> {}",
            from.map(|m| m.to_string()).unwrap_or_default(),
            mode
        );
        self.set_state(SessionState::Switching);
        let token = self.new_operation();
        let constraints = self.status.constraints.unwrap_or_default();

        let mut acquired = Vec::new();
        for kind in [SourceKind::Camera, SourceKind::Screen] {
            if !mode.uses(kind) || self.has_live_source(kind) {
                continue;
            }
            self.release_source(kind);
            if let Err(e) = self.acquire(kind, &constraints, &token).await {
                for kind in acquired {
                    self.release_source(kind);
                }
                if !matches!(e, AppError::Cancelled) {
                    self.surface_error(&e, false);
                }
                self.set_state(SessionState::Live);
                return Err(e);
            }
            acquired.push(kind);
        }

        if let Err(e) = self.cut_over(mode).await {
            self.teardown().await;
            self.surface_error(&e, true);
            self.set_state(SessionState::Error);
            return Err(e);
        }

        self.status.mode = Some(mode);
        self.events
            .publish(SystemEvent::SourceSwitched { from, to: mode });
        self.set_state(SessionState::Live);
        Ok(())
    }

    /// Point the senders at `mode`'s tracks and drop what it no longer needs
    ///
    /// Only kinds whose track actually changes see a `replace_track`. The
    /// outgoing compositor and sources are stopped after the swap.
    async fn cut_over(&mut self, mode: SourceMode) -> Result<()> {
        let entering_hybrid = mode == SourceMode::Hybrid && self.compositor.is_none();
        if entering_hybrid {
            self.start_compositor()?;
        }
        self.apply_enabled();

        let target = self.stream_for(mode);
        if let Some(peer) = self.peer.as_ref() {
            for kind in [MediaKind::Video, MediaKind::Audio] {
                let next = target.track(kind);
                let current = peer.attached(kind).await;
                if current.as_deref() == next.map(|t| t.id()) {
                    continue;
                }
                if let Err(e) = peer.replace_track(kind, next.cloned()).await {
                    if entering_hybrid {
                        if let Some(mut compositor) = self.compositor.take() {
                            compositor.stop().await;
                        }
                    }
                    return Err(e);
                }
            }
        }

        if mode != SourceMode::Hybrid {
            if let Some(mut compositor) = self.compositor.take() {
                compositor.stop().await;
            }
        }
        for kind in [SourceKind::Camera, SourceKind::Screen] {
            if !mode.uses(kind) {
                self.release_source(kind);
            }
        }
        Ok(())
    }

    async fn update_layout(&mut self, layout: OverlayLayout) -> Result<()> {
        self.status.layout = layout;
        let hybrid_live =
            self.status.state == SessionState::Live && self.status.mode == Some(SourceMode::Hybrid);
        if hybrid_live {
            self.set_state(SessionState::Switching);
        }
        if let Some(compositor) = &self.compositor {
            compositor.update_layout(layout);
        }
        debug!("Overlay layout: {:?}", layout);
        self.events.publish(SystemEvent::LayoutChanged { layout });
        if hybrid_live {
            self.set_state(SessionState::Live);
        } else {
            self.publish_status();
        }
        Ok(())
    }

    fn reconfigure(&mut self, settings: SessionSettings) {
        info!(
            "Session settings updated (reconnect {}x/{:?}, {} ICE servers)",
            settings.reconnect.max_attempts,
            settings.reconnect.delay,
            settings.ice_servers.len()
        );
        // The configured layout is only a default for the next session
        if !self.holds_resources() {
            self.status.layout = settings.layout;
            self.publish_status();
        }
        self.settings = settings;
    }

    fn toggle(&mut self, kind: MediaKind) -> bool {
        let enabled = match kind {
            MediaKind::Video => {
                self.status.video_enabled = !self.status.video_enabled;
                self.status.video_enabled
            }
            MediaKind::Audio => {
                self.status.audio_enabled = !self.status.audio_enabled;
                self.status.audio_enabled
            }
        };
        self.apply_enabled();
        info!("{} {}", kind, if enabled { "enabled" } else { "muted" });
        self.events.publish(SystemEvent::TrackToggled { kind, enabled });
        self.publish_status();
        enabled
    }

    // ------------------------------------------------------------------
    // Asynchronous notifications
    // ------------------------------------------------------------------

    async fn on_source_event(&mut self, event: SourceEvent) {
        let SourceEvent::Lost { kind, source_id } = event;
        if self.source(kind).map(|s| s.id()) != Some(source_id.as_str()) {
            debug!("Ignoring loss of stale {} source {}", kind, source_id);
            return;
        }
        self.events.publish(SystemEvent::SourceLost {
            kind,
            source_id: source_id.clone(),
        });
        let err = AppError::SourceLostMidStream {
            kind: kind.to_string(),
            reason: "capture ended by the system".to_string(),
        };

        match self.status.mode {
            Some(SourceMode::Hybrid) if self.compositor.is_some() => {
                let remaining = SourceMode::single(kind.other());
                warn!(
                    "{} source lost while compositing, continuing with {}",
                    kind, remaining
                );
                self.surface_error(&err, false);
                let live = self.status.state == SessionState::Live;
                if live {
                    self.set_state(SessionState::Switching);
                }
                match self.cut_over(remaining).await {
                    Ok(()) => {
                        let from = self.status.mode;
                        self.status.mode = Some(remaining);
                        self.events.publish(SystemEvent::SourceSwitched {
                            from,
                            to: remaining,
                        });
                        if live {
                            self.set_state(SessionState::Live);
                        } else {
                            self.publish_status();
                        }
                    }
                    Err(e) => {
                        self.teardown().await;
                        self.surface_error(&e, true);
                        self.set_state(SessionState::Error);
                    }
                }
            }
            Some(mode) if mode.uses(kind) && self.status.state == SessionState::Live => {
                warn!("{} source {} lost, parking its senders", kind, source_id);
                self.surface_error(&err, false);
                if let Err(e) = self.park_source(kind).await {
                    self.teardown().await;
                    self.surface_error(&e, true);
                    self.set_state(SessionState::Error);
                    return;
                }
                self.release_source(kind);
                self.publish_status();
            }
            _ => {
                self.release_source(kind);
                self.publish_status();
            }
        }
    }

    /// Detach every sender currently fed by the source of `kind`
    async fn park_source(&self, kind: SourceKind) -> Result<()> {
        let (Some(peer), Some(source)) = (self.peer.as_ref(), self.source(kind)) else {
            return Ok(());
        };
        for media in [MediaKind::Video, MediaKind::Audio] {
            let Some(track) = source.track(media) else {
                continue;
            };
            if peer.attached(media).await.as_deref() == Some(track.id()) {
                peer.replace_track(media, None).await?;
            }
        }
        Ok(())
    }

    async fn on_peer_state(&mut self, state: ConnectionState) {
        self.status.connection = Some(state);
        if let Some(session_id) = self.status.peer_id.clone() {
            self.events
                .publish(SystemEvent::PeerConnectionState { session_id, state });
        }
        match state {
            ConnectionState::Connected => {
                if self.status.reconnect_attempts > 0 {
                    info!("Peer connection recovered");
                }
                self.status.reconnect_attempts = 0;
                self.publish_status();
            }
            ConnectionState::Failed
                if matches!(
                    self.status.state,
                    SessionState::Live | SessionState::Switching
                ) =>
            {
                self.on_connection_failed(AppError::ConnectionFailed(
                    "peer connection failed".to_string(),
                ))
                .await;
            }
            _ => self.publish_status(),
        }
    }

    /// Schedule the next reconnect or give up for good
    async fn on_connection_failed(&mut self, err: AppError) {
        self.close_peer().await;
        let policy = self.settings.reconnect;
        if self.status.reconnect_attempts < policy.max_attempts {
            let attempt = self.status.reconnect_attempts + 1;
            warn!(
                "Connection lost ({}), reconnecting in {:?} (attempt {}/{})",
                err, policy.delay, attempt, policy.max_attempts
            );
            self.surface_error(&err, false);
            self.reconnect_at = Some(Instant::now() + policy.delay);
            self.events.publish(SystemEvent::PeerReconnecting {
                attempt,
                delay_ms: policy.delay.as_millis() as u64,
            });
            self.set_state(SessionState::Error);
        } else {
            warn!("Connection lost ({}), giving up", err);
            self.teardown().await;
            self.surface_error(&err, true);
            self.set_state(SessionState::Error);
        }
    }

    async fn reconnect(&mut self) {
        self.reconnect_at = None;
        self.status.reconnect_attempts += 1;
        info!(
            "Reconnecting (attempt {})",
            self.status.reconnect_attempts
        );
        self.set_state(SessionState::Initializing);

        let token = self.new_operation();
        match self.connect(&token).await {
            Ok(()) => {
                self.status.error = None;
                self.set_state(SessionState::Live);
            }
            Err(AppError::Cancelled) => debug!("Reconnect abandoned"),
            Err(e) => self.on_connection_failed(e).await,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn acquire(
        &mut self,
        kind: SourceKind,
        constraints: &CaptureConstraints,
        token: &CancellationToken,
    ) -> Result<()> {
        let source = self.capture.acquire(kind, constraints, token).await?;
        self.release_source(kind);
        *self.source_slot(kind) = Some(source);
        Ok(())
    }

    fn release_source(&mut self, kind: SourceKind) {
        if let Some(source) = self.source_slot(kind).take() {
            self.capture.release(&source);
        }
    }

    fn source(&self, kind: SourceKind) -> Option<&CaptureSource> {
        match kind {
            SourceKind::Camera => self.camera.as_ref(),
            SourceKind::Screen => self.screen.as_ref(),
        }
    }

    fn source_slot(&mut self, kind: SourceKind) -> &mut Option<CaptureSource> {
        match kind {
            SourceKind::Camera => &mut self.camera,
            SourceKind::Screen => &mut self.screen,
        }
    }

    fn has_live_source(&self, kind: SourceKind) -> bool {
        self.source(kind).is_some_and(|s| !s.is_lost())
    }

    /// Every source `mode` draws from is held and still delivering
    fn sources_ready(&self, mode: SourceMode) -> bool {
        [SourceKind::Camera, SourceKind::Screen]
            .into_iter()
            .all(|kind| !mode.uses(kind) || self.has_live_source(kind))
    }

    fn holds_resources(&self) -> bool {
        self.camera.is_some()
            || self.screen.is_some()
            || self.compositor.is_some()
            || self.peer.is_some()
    }

    fn start_compositor(&mut self) -> Result<()> {
        let primary_kind = self.settings.hybrid_primary.kind();
        let (Some(primary), Some(secondary)) =
            (self.source(primary_kind), self.source(primary_kind.other()))
        else {
            return Err(AppError::InvalidState(
                "compositing needs both camera and screen".to_string(),
            ));
        };
        let output = self
            .status
            .constraints
            .unwrap_or_default()
            .resolution
            .resolution();
        let settings = CompositorSettings::new(output, self.settings.compositor_fps);
        let compositor = Compositor::start(primary, secondary, self.status.layout, settings);
        self.compositor = Some(compositor);
        Ok(())
    }

    /// Tracks the senders should carry in `mode`
    fn stream_for(&self, mode: SourceMode) -> PublishableStream {
        let live = |track: Option<&TrackHandle>| track.filter(|t| !t.is_ended()).cloned();
        match mode {
            SourceMode::Camera | SourceMode::Screen => {
                let kind = if mode == SourceMode::Camera {
                    SourceKind::Camera
                } else {
                    SourceKind::Screen
                };
                let source = self.source(kind);
                PublishableStream::new(
                    live(source.and_then(|s| s.video_track())),
                    live(source.and_then(|s| s.audio_track())),
                )
            }
            SourceMode::Hybrid => {
                let primary = self.source(self.settings.hybrid_primary.kind());
                let secondary = self.source(self.settings.hybrid_primary.kind().other());
                let audio = live(primary.and_then(|s| s.audio_track()))
                    .or_else(|| live(secondary.and_then(|s| s.audio_track())));
                PublishableStream::new(
                    live(self.compositor.as_ref().map(|c| c.track())),
                    audio,
                )
            }
        }
    }

    /// Push the session-level enabled flags down to every live track
    fn apply_enabled(&self) {
        for source in [&self.camera, &self.screen].into_iter().flatten() {
            self.capture
                .set_enabled(source, MediaKind::Video, self.status.video_enabled);
            self.capture
                .set_enabled(source, MediaKind::Audio, self.status.audio_enabled);
        }
        if let Some(compositor) = &self.compositor {
            compositor.track().set_enabled(self.status.video_enabled);
        }
    }

    fn new_operation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.operation.lock() = token.clone();
        token
    }

    fn set_state(&mut self, state: SessionState) {
        if self.status.state != state {
            debug!("Session state: {} -> {}", self.status.state, state);
        }
        self.status.state = state;
        match state {
            SessionState::Live => {
                self.status.live_since.get_or_insert_with(Utc::now);
            }
            SessionState::Switching => {}
            _ => self.status.live_since = None,
        }
        self.publish_status();
        self.events.publish(SystemEvent::SessionStateChanged {
            state,
            mode: self.status.mode,
        });
    }

    fn surface_error(&mut self, err: &AppError, terminal: bool) {
        self.status.error = Some(err.info());
        self.events.publish_error(err, terminal);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

/// Next peer state, `None` once the session drops its sender
async fn peer_state_changed(
    rx: &mut Option<watch::Receiver<ConnectionState>>,
) -> Option<ConnectionState> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
