//! Capture backend abstraction
//!
//! A backend turns a permission-gated device (camera, microphone, display)
//! into live [`TrackHandle`]s. Producers stop on their own once every
//! track they feed has ended.

use async_trait::async_trait;

use super::types::CaptureConstraints;
use crate::error::Result;
use crate::media::TrackHandle;

/// Tracks produced by a successful open
#[derive(Debug, Default)]
pub struct OpenedSource {
    pub video: Option<TrackHandle>,
    pub audio: Option<TrackHandle>,
}

impl OpenedSource {
    /// Stop every track (used when an open is abandoned)
    pub fn stop(&self) {
        for track in self.video.iter().chain(self.audio.iter()) {
            track.stop();
        }
    }
}

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Open camera video, plus microphone audio when `constraints.audio`
    /// is set, as a single request
    async fn open_camera(&self, constraints: &CaptureConstraints) -> Result<OpenedSource>;

    /// Open display capture; audio is included only when the platform
    /// offers it
    async fn open_screen(&self, constraints: &CaptureConstraints) -> Result<OpenedSource>;
}
