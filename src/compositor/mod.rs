//! Picture-in-picture compositor
//!
//! Renders the primary source full-frame with the secondary source drawn in
//! the overlay rect, on a fixed cadence, into one synthetic video track.
//! Layout changes travel over a `watch` channel and are picked up at the
//! next tick.

pub mod layout;
pub mod raster;

pub use layout::{
    compute_overlay_rect, scaled_padding, OverlayLayout, OverlayPosition, OverlaySize, Rect,
};
pub use raster::Surface;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::CaptureSource;
use crate::media::{MediaFrame, MediaKind, Resolution, TrackHandle, VideoFrame};

/// Output parameters of the synthetic track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorSettings {
    pub output: Resolution,
    pub fps: u32,
}

impl CompositorSettings {
    pub fn new(output: Resolution, fps: u32) -> Self {
        Self { output, fps }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps.clamp(1, 60) as u64)
    }
}

pub struct Compositor {
    output: TrackHandle,
    layout_tx: watch::Sender<OverlayLayout>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    frames_rendered: Arc<AtomicU64>,
}

impl Compositor {
    /// Start compositing `secondary` over `primary`
    ///
    /// Both sources must outlive the compositor; call [`Compositor::stop`]
    /// before releasing either.
    pub fn start(
        primary: &CaptureSource,
        secondary: &CaptureSource,
        layout: OverlayLayout,
        settings: CompositorSettings,
    ) -> Self {
        info!(
            "Starting compositor: {} over {} at {} @ {} fps",
            secondary.kind(),
            primary.kind(),
            settings.output,
            settings.fps
        );
        Self::from_tracks(
            primary.video_track().cloned(),
            secondary.video_track().cloned(),
            layout,
            settings,
        )
    }

    pub(crate) fn from_tracks(
        primary: Option<TrackHandle>,
        secondary: Option<TrackHandle>,
        layout: OverlayLayout,
        settings: CompositorSettings,
    ) -> Self {
        let output = TrackHandle::new(MediaKind::Video, "composite");
        let (layout_tx, layout_rx) = watch::channel(layout);
        let cancel = CancellationToken::new();
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let render = RenderLoop {
            primary: primary.map(Input::new),
            secondary: secondary.map(Input::new),
            output: output.clone(),
            layout_rx,
            surface: Surface::new(settings.output),
            frames_rendered: frames_rendered.clone(),
        };
        let task = tokio::spawn(render.run(settings, cancel.clone()));

        Self {
            output,
            layout_tx,
            cancel,
            task: Some(task),
            frames_rendered,
        }
    }

    /// The synthetic video track
    pub fn track(&self) -> &TrackHandle {
        &self.output
    }

    /// Takes effect on the next rendered frame
    pub fn update_layout(&self, layout: OverlayLayout) {
        self.layout_tx.send_replace(layout);
    }

    pub fn layout(&self) -> OverlayLayout {
        *self.layout_tx.borrow()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Halt the render loop and end the synthetic track; idempotent
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!("Compositor stopped after {} frames", self.frames_rendered());
        }
        self.output.stop();
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.output.stop();
    }
}

struct Input {
    track: TrackHandle,
    rx: broadcast::Receiver<MediaFrame>,
    last: Option<VideoFrame>,
}

impl Input {
    fn new(track: TrackHandle) -> Self {
        let rx = track.subscribe();
        Self {
            track,
            rx,
            last: None,
        }
    }

    /// Keep only the newest pending frame
    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(MediaFrame::Video(frame)) => self.last = Some(frame),
                Ok(MediaFrame::Audio(_)) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}

struct RenderLoop {
    primary: Option<Input>,
    secondary: Option<Input>,
    output: TrackHandle,
    layout_rx: watch::Receiver<OverlayLayout>,
    surface: Surface,
    frames_rendered: Arc<AtomicU64>,
}

impl RenderLoop {
    async fn run(mut self, settings: CompositorSettings, cancel: CancellationToken) {
        let mut ticker = interval(settings.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let frame = self.render(sequence);
                    if !self.output.push(MediaFrame::Video(frame)) {
                        break;
                    }
                    sequence += 1;
                    self.frames_rendered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn render(&mut self, sequence: u64) -> VideoFrame {
        if let Some(primary) = self.primary.as_mut() {
            primary.drain();
        }

        let secondary_ended = self
            .secondary
            .as_ref()
            .map(|s| s.track.is_ended())
            .unwrap_or(false);
        if secondary_ended {
            info!("Overlay source ended, compositing primary only");
            self.secondary = None;
        }
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.drain();
        }

        let layout = *self.layout_rx.borrow_and_update();

        self.surface.fill(raster::BLACK);
        if let Some(frame) = self.primary.as_ref().and_then(visible_frame) {
            self.surface.draw_full(frame);
        }
        if let Some(frame) = self.secondary.as_ref().and_then(visible_frame) {
            let res = self.surface.resolution();
            let rect = compute_overlay_rect(res.width, res.height, layout);
            self.surface.draw_scaled(frame, rect);
        }

        self.surface.to_frame(sequence)
    }
}

/// Last frame of an input, unless the input is muted
fn visible_frame(input: &Input) -> Option<&VideoFrame> {
    if input.track.is_enabled() {
        input.last.as_ref()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::raster::{frame_pixel, solid_frame, BLACK};
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    fn settings() -> CompositorSettings {
        CompositorSettings::new(Resolution::new(320, 240), 30)
    }

    async fn next_frame(rx: &mut broadcast::Receiver<MediaFrame>) -> VideoFrame {
        loop {
            match rx.recv().await {
                Ok(MediaFrame::Video(frame)) => return frame,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("output closed: {}", e),
            }
        }
    }

    fn overlay_center(layout: OverlayLayout) -> (u32, u32) {
        compute_overlay_rect(320, 240, layout).center()
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_drawn_at_overlay_rect() {
        let primary = TrackHandle::new(MediaKind::Video, "screen");
        let secondary = TrackHandle::new(MediaKind::Video, "camera");
        let layout = OverlayLayout::default();
        let mut compositor =
            Compositor::from_tracks(Some(primary.clone()), Some(secondary.clone()), layout, settings());
        let mut out = compositor.track().subscribe();

        primary.push(MediaFrame::Video(solid_frame(Resolution::new(64, 48), RED, 0)));
        secondary.push(MediaFrame::Video(solid_frame(Resolution::new(32, 24), GREEN, 0)));

        let frame = next_frame(&mut out).await;
        assert_eq!(frame.resolution, Resolution::new(320, 240));
        assert_eq!(frame_pixel(&frame, 0, 0), Some(RED));
        let (cx, cy) = overlay_center(layout);
        assert_eq!(frame_pixel(&frame, cx, cy), Some(GREEN));

        compositor.stop().await;
        assert!(compositor.track().is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_update_applies_next_frame() {
        let primary = TrackHandle::new(MediaKind::Video, "screen");
        let secondary = TrackHandle::new(MediaKind::Video, "camera");
        let compositor = Compositor::from_tracks(
            Some(primary.clone()),
            Some(secondary.clone()),
            OverlayLayout::default(),
            settings(),
        );
        let mut out = compositor.track().subscribe();
        primary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), RED, 0)));
        secondary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), GREEN, 0)));
        next_frame(&mut out).await;

        let top_left = OverlayLayout::new(OverlayPosition::TopLeft, OverlaySize::Small);
        compositor.update_layout(top_left);
        let frame = next_frame(&mut out).await;
        let (cx, cy) = overlay_center(top_left);
        assert_eq!(frame_pixel(&frame, cx, cy), Some(GREEN));
        let (ox, oy) = overlay_center(OverlayLayout::default());
        assert_eq!(frame_pixel(&frame, ox, oy), Some(RED));
        assert_eq!(compositor.layout(), top_left);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_lost_keeps_rendering_primary() {
        let primary = TrackHandle::new(MediaKind::Video, "camera");
        let secondary = TrackHandle::new(MediaKind::Video, "screen");
        let compositor = Compositor::from_tracks(
            Some(primary.clone()),
            Some(secondary.clone()),
            OverlayLayout::default(),
            settings(),
        );
        let mut out = compositor.track().subscribe();
        primary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), RED, 0)));
        secondary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), GREEN, 0)));
        next_frame(&mut out).await;

        secondary.stop();
        let before = compositor.frames_rendered();
        let frame = next_frame(&mut out).await;
        let (cx, cy) = overlay_center(OverlayLayout::default());
        assert_eq!(frame_pixel(&frame, cx, cy), Some(RED));

        next_frame(&mut out).await;
        assert!(compositor.frames_rendered() > before);
        assert!(compositor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_lost_keeps_last_frame() {
        let primary = TrackHandle::new(MediaKind::Video, "screen");
        let compositor = Compositor::from_tracks(
            Some(primary.clone()),
            None,
            OverlayLayout::default(),
            settings(),
        );
        let mut out = compositor.track().subscribe();
        primary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), RED, 0)));
        next_frame(&mut out).await;

        primary.stop();
        let frame = next_frame(&mut out).await;
        assert_eq!(frame_pixel(&frame, 10, 10), Some(RED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_input_renders_black() {
        let compositor = Compositor::from_tracks(None, None, OverlayLayout::default(), settings());
        let mut out = compositor.track().subscribe();
        let frame = next_frame(&mut out).await;
        assert_eq!(frame_pixel(&frame, 5, 5), Some(BLACK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_secondary_is_hidden() {
        let primary = TrackHandle::new(MediaKind::Video, "screen");
        let secondary = TrackHandle::new(MediaKind::Video, "camera");
        let compositor = Compositor::from_tracks(
            Some(primary.clone()),
            Some(secondary.clone()),
            OverlayLayout::default(),
            settings(),
        );
        let mut out = compositor.track().subscribe();
        secondary.set_enabled(false);
        primary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), RED, 0)));
        secondary.push(MediaFrame::Video(solid_frame(Resolution::new(8, 8), GREEN, 0)));

        let frame = next_frame(&mut out).await;
        let (cx, cy) = overlay_center(OverlayLayout::default());
        assert_eq!(frame_pixel(&frame, cx, cy), Some(RED));
    }
}
