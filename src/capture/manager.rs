//! Capture source manager
//!
//! Owns the capture backend, enforces one in-flight acquisition per source
//! kind, and watches acquired sources for termination that did not come
//! from [`CaptureSourceManager::release`].

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::CaptureBackend;
use super::types::{CaptureConstraints, CaptureSource, SourceEvent, SourceKind};
use crate::error::{AppError, Result};
use crate::media::MediaKind;

/// Owns the capture backend and tracks every source it hands out
pub struct CaptureSourceManager {
    backend: Arc<dyn CaptureBackend>,
    /// Termination notices for the session controller
    events_tx: mpsc::UnboundedSender<SourceEvent>,
    /// Kinds with an acquisition in flight
    pending: Mutex<HashSet<SourceKind>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Clears the pending marker for a kind when the acquisition finishes
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<SourceKind>>,
    kind: SourceKind,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.kind);
    }
}

impl CaptureSourceManager {
    /// Create a manager and the receiver for its [`SourceEvent`]s
    pub fn new(backend: Arc<dyn CaptureBackend>) -> (Self, mpsc::UnboundedReceiver<SourceEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            backend,
            events_tx,
            pending: Mutex::new(HashSet::new()),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        };
        (manager, events_rx)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Acquire camera video (and microphone if requested) in one request
    ///
    /// # Arguments
    ///
    /// * `constraints` - Requested resolution, frame rate and audio flag
    /// * `cancel` - Aborts the request; a source granted after cancellation is released
    pub async fn acquire_camera(
        &self,
        constraints: &CaptureConstraints,
        cancel: &CancellationToken,
    ) -> Result<CaptureSource> {
        self.acquire(SourceKind::Camera, constraints, cancel).await
    }

    /// Acquire display capture and register its termination observer
    pub async fn acquire_screen(
        &self,
        constraints: &CaptureConstraints,
        cancel: &CancellationToken,
    ) -> Result<CaptureSource> {
        self.acquire(SourceKind::Screen, constraints, cancel).await
    }

    pub async fn acquire(
        &self,
        kind: SourceKind,
        constraints: &CaptureConstraints,
        cancel: &CancellationToken,
    ) -> Result<CaptureSource> {
        let _guard = self.begin(kind)?;

        let open = async {
            match kind {
                SourceKind::Camera => self.backend.open_camera(constraints).await,
                SourceKind::Screen => self.backend.open_screen(constraints).await,
            }
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} acquisition abandoned", kind);
                return Err(AppError::Cancelled);
            }
            result = open => result?,
        };

        if cancel.is_cancelled() {
            opened.stop();
            return Err(AppError::Cancelled);
        }

        let source = CaptureSource::new(kind, opened.video, opened.audio);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.observe(&source);

        info!(
            "Acquired {} source {} (video: {}, audio: {})",
            kind,
            source.id(),
            source.video_track().is_some(),
            source.audio_track().is_some()
        );
        Ok(source)
    }

    fn begin(&self, kind: SourceKind) -> Result<PendingGuard<'_>> {
        let mut pending = self.pending.lock();
        if !pending.insert(kind) {
            return Err(AppError::AcquisitionPending(kind.to_string()));
        }
        Ok(PendingGuard {
            pending: &self.pending,
            kind,
        })
    }

    fn observe(&self, source: &CaptureSource) {
        let Some(video) = source.video_track().cloned() else {
            return;
        };
        let released = source.released_flag();
        let events_tx = self.events_tx.clone();
        let kind = source.kind();
        let source_id = source.id().to_string();

        tokio::spawn(async move {
            video.wait_ended().await;
            if released.load(Ordering::SeqCst) {
                return;
            }
            warn!("{} source {} ended without release", kind, source_id);
            let _ = events_tx.send(SourceEvent::Lost { kind, source_id });
        });
    }

    /// Stop every component of `source`
    ///
    /// Idempotent; returns false if the source was already released.
    pub fn release(&self, source: &CaptureSource) -> bool {
        if !source.mark_released() {
            return false;
        }
        for track in source.video_track().into_iter().chain(source.audio_track()) {
            track.stop();
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        debug!("Released {} source {}", source.kind(), source.id());
        true
    }

    /// Flip the enabled flag of one component without releasing it
    ///
    /// Returns the new value, or `None` if the source has no such component.
    pub fn toggle(&self, source: &CaptureSource, kind: MediaKind) -> Option<bool> {
        source.track(kind).map(|t| t.toggle())
    }

    pub fn toggle_video(&self, source: &CaptureSource) -> Option<bool> {
        self.toggle(source, MediaKind::Video)
    }

    pub fn toggle_audio(&self, source: &CaptureSource) -> Option<bool> {
        self.toggle(source, MediaKind::Audio)
    }

    pub fn set_enabled(&self, source: &CaptureSource, kind: MediaKind, enabled: bool) {
        if let Some(track) = source.track(kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn is_pending(&self, kind: SourceKind) -> bool {
        self.pending.lock().contains(&kind)
    }

    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}
