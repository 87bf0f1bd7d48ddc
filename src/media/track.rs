//! Live media track handles
//!
//! A [`TrackHandle`] is the unit that moves between the capture layer, the
//! compositor and the peer session. Producers push frames into it; any number
//! of consumers subscribe. The handle carries two flags:
//!
//! - `enabled`: mute-in-place. Producers keep running, consumers that feed the
//!   network drop frames while it is false.
//! - `ended`: termination observer. Once set it never clears.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use super::frame::{AudioFrame, VideoFrame};

/// Frame channel capacity per track
const TRACK_CHANNEL_CAPACITY: usize = 8;

/// Media kind of a track or sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A frame of either kind
#[derive(Debug, Clone)]
pub enum MediaFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl MediaFrame {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaFrame::Video(_) => MediaKind::Video,
            MediaFrame::Audio(_) => MediaKind::Audio,
        }
    }
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    frames: broadcast::Sender<MediaFrame>,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    frames_pushed: AtomicU64,
}

/// Cloneable handle to a live track
#[derive(Clone)]
pub struct TrackHandle {
    inner: Arc<TrackInner>,
}

impl std::fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl TrackHandle {
    /// Create a new live track
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        let (frames, _) = broadcast::channel(TRACK_CHANNEL_CAPACITY);
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label: label.into(),
                frames,
                enabled: AtomicBool::new(true),
                ended,
                frames_pushed: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &TrackHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribe to frames
    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.inner.frames.subscribe()
    }

    /// Push a frame from the producer side
    ///
    /// Returns false once the track has ended, telling the producer to stop.
    pub fn push(&self, frame: MediaFrame) -> bool {
        if self.is_ended() {
            return false;
        }
        debug_assert_eq!(frame.kind(), self.inner.kind);
        self.inner.frames_pushed.fetch_add(1, Ordering::Relaxed);
        // No subscribers is normal while the track is not attached anywhere
        let _ = self.inner.frames.send(frame);
        true
    }

    pub fn frames_pushed(&self) -> u64 {
        self.inner.frames_pushed.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag, returning the new value
    pub fn toggle(&self) -> bool {
        !self.inner.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Observe the ended flag
    pub fn ended_watch(&self) -> watch::Receiver<bool> {
        self.inner.ended.subscribe()
    }

    /// Resolve once the track has ended
    pub async fn wait_ended(&self) {
        let mut rx = self.ended_watch();
        // Err means the sender is gone, which only happens with the handle itself
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// End the track; returns true on the first call only
    pub fn stop(&self) -> bool {
        self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::format::Resolution;

    #[test]
    fn test_toggle_returns_new_value() {
        let track = TrackHandle::new(MediaKind::Video, "cam");
        assert!(track.is_enabled());
        assert!(!track.toggle());
        assert!(!track.is_enabled());
        assert!(track.toggle());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = TrackHandle::new(MediaKind::Audio, "mic");
        assert!(track.stop());
        assert!(!track.stop());
        assert!(track.is_ended());
        assert!(!track.push(MediaFrame::Audio(AudioFrame::silence(0))));
    }

    #[tokio::test]
    async fn test_subscribers_receive_frames() {
        let track = TrackHandle::new(MediaKind::Video, "cam");
        let mut rx = track.subscribe();
        assert!(track.push(MediaFrame::Video(VideoFrame::blank(Resolution::new(2, 2), 1))));
        match rx.recv().await.unwrap() {
            MediaFrame::Video(frame) => assert_eq!(frame.sequence, 1),
            other => panic!("unexpected frame {:?}", other.kind()),
        }
        assert_eq!(track.frames_pushed(), 1);
    }

    #[tokio::test]
    async fn test_wait_ended_resolves() {
        let track = TrackHandle::new(MediaKind::Video, "screen");
        let waiter = track.clone();
        let task = tokio::spawn(async move { waiter.wait_ended().await });
        track.stop();
        task.await.unwrap();
    }
}
