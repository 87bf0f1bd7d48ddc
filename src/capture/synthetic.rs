//! Synthetic capture backend
//!
//! Produces a moving test pattern and Opus silence without touching real
//! devices. Used for headless runs and as the backend in tests, where the
//! failure knobs simulate denied permissions, missing devices and the
//! user revoking screen sharing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::backend::{CaptureBackend, OpenedSource};
use super::types::{CaptureConstraints, SourceKind};
use crate::error::{AppError, Result};
use crate::media::{AudioFrame, MediaFrame, MediaKind, PixelFormat, Resolution, TrackHandle, VideoFrame};

/// Failure a synthetic open can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFailure {
    PermissionDenied,
    DeviceUnavailable,
    UserCancelled,
    NotSupported,
}

impl SyntheticFailure {
    fn to_error(self, kind: SourceKind) -> AppError {
        match self {
            SyntheticFailure::PermissionDenied => {
                AppError::PermissionDenied(format!("{} access denied", kind))
            }
            SyntheticFailure::DeviceUnavailable => {
                AppError::DeviceUnavailable(format!("no {} device", kind))
            }
            SyntheticFailure::UserCancelled => AppError::UserCancelledCapture,
            SyntheticFailure::NotSupported => {
                AppError::NotSupported(format!("{} capture", kind))
            }
        }
    }
}

pub struct SyntheticBackend {
    frame_size: Option<Resolution>,
    screen_audio: bool,
    open_delay: Duration,
    camera_failure: Mutex<Option<SyntheticFailure>>,
    screen_failure: Mutex<Option<SyntheticFailure>>,
    live: Mutex<Vec<(SourceKind, TrackHandle)>>,
    camera_opens: AtomicU64,
    screen_opens: AtomicU64,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            frame_size: None,
            screen_audio: false,
            open_delay: Duration::ZERO,
            camera_failure: Mutex::new(None),
            screen_failure: Mutex::new(None),
            live: Mutex::new(Vec::new()),
            camera_opens: AtomicU64::new(0),
            screen_opens: AtomicU64::new(0),
        }
    }

    /// Render frames at a fixed size instead of the requested tier
    pub fn with_frame_size(mut self, size: Resolution) -> Self {
        self.frame_size = Some(size);
        self
    }

    /// Offer a system-audio track with screen captures
    pub fn with_screen_audio(mut self, enabled: bool) -> Self {
        self.screen_audio = enabled;
        self
    }

    /// Delay every open, simulating a pending permission prompt
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn fail_camera(&self, failure: Option<SyntheticFailure>) {
        *self.camera_failure.lock() = failure;
    }

    pub fn fail_screen(&self, failure: Option<SyntheticFailure>) {
        *self.screen_failure.lock() = failure;
    }

    pub fn camera_opens(&self) -> u64 {
        self.camera_opens.load(Ordering::SeqCst)
    }

    pub fn screen_opens(&self) -> u64 {
        self.screen_opens.load(Ordering::SeqCst)
    }

    /// Simulate the OS "stop sharing" action on every live screen capture
    ///
    /// Returns the number of tracks ended.
    pub fn revoke_screen(&self) -> usize {
        self.end_tracks(SourceKind::Screen)
    }

    /// Simulate the camera being unplugged
    pub fn unplug_camera(&self) -> usize {
        self.end_tracks(SourceKind::Camera)
    }

    fn end_tracks(&self, kind: SourceKind) -> usize {
        let mut live = self.live.lock();
        live.retain(|(_, t)| !t.is_ended());
        live.iter()
            .filter(|(k, _)| *k == kind)
            .filter(|(_, t)| t.stop())
            .count()
    }

    fn resolution_for(&self, constraints: &CaptureConstraints) -> Resolution {
        self.frame_size
            .unwrap_or_else(|| constraints.resolution.resolution())
    }

    async fn open(
        &self,
        kind: SourceKind,
        constraints: &CaptureConstraints,
        with_audio: bool,
    ) -> Result<OpenedSource> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let failure = match kind {
            SourceKind::Camera => *self.camera_failure.lock(),
            SourceKind::Screen => *self.screen_failure.lock(),
        };
        if let Some(failure) = failure {
            return Err(failure.to_error(kind));
        }

        let video = TrackHandle::new(MediaKind::Video, format!("synthetic-{}", kind));
        spawn_pattern(
            video.clone(),
            kind,
            self.resolution_for(constraints),
            constraints.effective_fps(),
        );

        let audio = if with_audio {
            let audio = TrackHandle::new(MediaKind::Audio, format!("synthetic-{}-audio", kind));
            spawn_silence(audio.clone());
            Some(audio)
        } else {
            None
        };

        let mut live = self.live.lock();
        live.push((kind, video.clone()));
        if let Some(audio) = &audio {
            live.push((kind, audio.clone()));
        }

        debug!("Synthetic {} opened (audio: {})", kind, audio.is_some());
        Ok(OpenedSource {
            video: Some(video),
            audio,
        })
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open_camera(&self, constraints: &CaptureConstraints) -> Result<OpenedSource> {
        self.camera_opens.fetch_add(1, Ordering::SeqCst);
        self.open(SourceKind::Camera, constraints, constraints.audio)
            .await
    }

    async fn open_screen(&self, constraints: &CaptureConstraints) -> Result<OpenedSource> {
        self.screen_opens.fetch_add(1, Ordering::SeqCst);
        self.open(SourceKind::Screen, constraints, self.screen_audio)
            .await
    }
}

/// Render one pattern frame: flat background with a sliding white bar
pub fn render_pattern(kind: SourceKind, resolution: Resolution, sequence: u64) -> VideoFrame {
    let (r, g, b) = match kind {
        SourceKind::Camera => (0x20, 0x40, 0x80),
        SourceKind::Screen => (0x30, 0x30, 0x30),
    };
    let width = resolution.width as usize;
    let bar_width = (width / 40).max(1);
    let bar_x = (sequence as usize * bar_width) % width.max(1);

    let mut data = vec![0u8; PixelFormat::Rgba.frame_size(resolution)];
    for row in data.chunks_exact_mut(width * 4) {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let on_bar = x >= bar_x && x < bar_x + bar_width;
            if on_bar {
                px.copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
            } else {
                px.copy_from_slice(&[r, g, b, 0xFF]);
            }
        }
    }
    VideoFrame::from_vec(data, resolution, sequence)
}

fn spawn_pattern(track: TrackHandle, kind: SourceKind, resolution: Resolution, fps: u32) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_micros(1_000_000 / fps.max(1) as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = render_pattern(kind, resolution, sequence);
                    if !track.push(MediaFrame::Video(frame)) {
                        break;
                    }
                    sequence += 1;
                }
                _ = track.wait_ended() => break,
            }
        }
        debug!("Synthetic {} video producer stopped after {} frames", kind, sequence);
    });
}

fn spawn_silence(track: TrackHandle) {
    tokio::spawn(async move {
        let mut ticker = interval(AudioFrame::silence(0).duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !track.push(MediaFrame::Audio(AudioFrame::silence(sequence))) {
                        break;
                    }
                    sequence += 1;
                }
                _ = track.wait_ended() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ResolutionTier;

    fn small() -> SyntheticBackend {
        SyntheticBackend::new().with_frame_size(Resolution::new(32, 24))
    }

    #[tokio::test]
    async fn test_camera_opens_video_and_audio_together() {
        let backend = small();
        let opened = backend
            .open_camera(&CaptureConstraints::default())
            .await
            .unwrap();
        assert!(opened.video.is_some());
        assert!(opened.audio.is_some());
        assert_eq!(backend.camera_opens(), 1);
    }

    #[tokio::test]
    async fn test_screen_audio_is_optional() {
        let backend = small();
        let opened = backend
            .open_screen(&CaptureConstraints::default())
            .await
            .unwrap();
        assert!(opened.audio.is_none());

        let backend = small().with_screen_audio(true);
        let opened = backend
            .open_screen(&CaptureConstraints::default())
            .await
            .unwrap();
        assert!(opened.audio.is_some());
    }

    #[tokio::test]
    async fn test_failure_knobs() {
        let backend = small();
        backend.fail_screen(Some(SyntheticFailure::UserCancelled));
        let err = backend
            .open_screen(&CaptureConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UserCancelledCapture));

        backend.fail_camera(Some(SyntheticFailure::PermissionDenied));
        let err = backend
            .open_camera(&CaptureConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_frames_flow_until_revoked() {
        let backend = small();
        let opened = backend
            .open_screen(&CaptureConstraints::new(ResolutionTier::Hd720, 30))
            .await
            .unwrap();
        let video = opened.video.unwrap();
        let mut rx = video.subscribe();

        match rx.recv().await.unwrap() {
            MediaFrame::Video(frame) => {
                assert_eq!(frame.resolution, Resolution::new(32, 24));
                assert!(frame.is_well_formed());
            }
            other => panic!("unexpected frame {:?}", other.kind()),
        }

        assert_eq!(backend.revoke_screen(), 1);
        assert!(video.is_ended());
        assert_eq!(backend.revoke_screen(), 0);
    }

    #[test]
    fn test_pattern_bar_moves() {
        let res = Resolution::new(80, 2);
        let a = render_pattern(SourceKind::Camera, res, 0);
        let b = render_pattern(SourceKind::Camera, res, 1);
        assert_ne!(a.data(), b.data());
        assert_eq!(&a.data()[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }
}
