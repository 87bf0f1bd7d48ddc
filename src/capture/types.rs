//! Capture source types

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::media::{MediaKind, Resolution, TrackHandle};

/// Kind of capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Screen,
}

impl SourceKind {
    pub fn other(&self) -> SourceKind {
        match self {
            SourceKind::Camera => SourceKind::Screen,
            SourceKind::Screen => SourceKind::Camera,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::Screen => write!(f, "screen"),
        }
    }
}

/// Resolution tier requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "4k")]
    Uhd4k,
}

impl ResolutionTier {
    pub fn resolution(&self) -> Resolution {
        match self {
            ResolutionTier::Hd720 => Resolution::HD720,
            ResolutionTier::Hd1080 => Resolution::HD1080,
            ResolutionTier::Uhd4k => Resolution::UHD4K,
        }
    }
}

impl std::fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionTier::Hd720 => write!(f, "720p"),
            ResolutionTier::Hd1080 => write!(f, "1080p"),
            ResolutionTier::Uhd4k => write!(f, "4k"),
        }
    }
}

/// Capture constraints supplied before `start()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub resolution: ResolutionTier,
    /// Target frame rate
    pub fps: u32,
    /// Request a microphone together with the camera
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            resolution: ResolutionTier::Hd720,
            fps: 30,
            audio: true,
        }
    }
}

impl CaptureConstraints {
    pub fn new(resolution: ResolutionTier, fps: u32) -> Self {
        Self {
            resolution,
            fps,
            ..Default::default()
        }
    }

    /// Frame rate clamped to a usable range
    pub fn effective_fps(&self) -> u32 {
        self.fps.clamp(1, 60)
    }
}

/// A live capture source owned by the capture manager's caller
///
/// Not `Clone`: there is exactly one owner per acquired source.
#[derive(Debug)]
pub struct CaptureSource {
    id: String,
    kind: SourceKind,
    video: Option<TrackHandle>,
    audio: Option<TrackHandle>,
    released: Arc<AtomicBool>,
}

impl CaptureSource {
    pub(crate) fn new(kind: SourceKind, video: Option<TrackHandle>, audio: Option<TrackHandle>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            video,
            audio,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn video_track(&self) -> Option<&TrackHandle> {
        self.video.as_ref()
    }

    pub fn audio_track(&self) -> Option<&TrackHandle> {
        self.audio.as_ref()
    }

    pub fn track(&self, kind: MediaKind) -> Option<&TrackHandle> {
        match kind {
            MediaKind::Video => self.video_track(),
            MediaKind::Audio => self.audio_track(),
        }
    }

    /// True when at least one component is delivering
    pub fn is_enabled(&self) -> bool {
        self.video.iter().chain(self.audio.iter()).any(|t| t.is_enabled())
    }

    /// True when the video component ended without a release (e.g. revoked)
    pub fn is_lost(&self) -> bool {
        !self.is_released() && self.video.as_ref().map(|t| t.is_ended()).unwrap_or(false)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Mark released; returns true the first time only
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

/// Events emitted by the capture manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The source ended without being released (user revoked sharing,
    /// device unplugged)
    Lost { kind: SourceKind, source_id: String },
}
