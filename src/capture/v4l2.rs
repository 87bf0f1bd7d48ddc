//! V4L2 camera backend
//!
//! Captures YUYV from a video device on a dedicated thread and converts it
//! to RGBA. Display capture is not available through V4L2.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::backend::{CaptureBackend, OpenedSource};
use super::types::CaptureConstraints;
use crate::error::{AppError, Result};
use crate::media::{MediaFrame, MediaKind, Resolution, TrackHandle, VideoFrame};
use crate::utils::LogThrottler;
use crate::warn_throttled;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Backend {
    device: PathBuf,
}

impl V4l2Backend {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }
}

#[async_trait]
impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    async fn open_camera(&self, constraints: &CaptureConstraints) -> Result<OpenedSource> {
        let requested = constraints.resolution.resolution();
        let fps = constraints.effective_fps();
        let video = TrackHandle::new(
            MediaKind::Video,
            format!("v4l2:{}", self.device.display()),
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let path = self.device.clone();
        let track = video.clone();
        std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || capture_thread(path, requested, fps, track, ready_tx))
            .map_err(|e| AppError::Internal(format!("Failed to spawn capture thread: {}", e)))?;

        let actual = ready_rx
            .await
            .map_err(|_| AppError::Internal("Capture thread exited early".to_string()))??;

        if constraints.audio {
            info!("V4L2 backend has no microphone support, camera audio omitted");
        }
        info!(
            "Camera {} opened at {} (requested {})",
            self.device.display(),
            actual,
            requested
        );

        Ok(OpenedSource {
            video: Some(video),
            audio: None,
        })
    }

    async fn open_screen(&self, _constraints: &CaptureConstraints) -> Result<OpenedSource> {
        Err(AppError::NotSupported(
            "display capture is not available on the v4l2 backend".to_string(),
        ))
    }
}

fn map_open_error(path: &Path, err: io::Error) -> AppError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            AppError::PermissionDenied(format!("{}: {}", path.display(), err))
        }
        _ => AppError::DeviceUnavailable(format!("{}: {}", path.display(), err)),
    }
}

fn configure(dev: &Device, requested: Resolution, fps: u32) -> io::Result<Resolution> {
    let mut fmt = dev.format()?;
    fmt.width = requested.width;
    fmt.height = requested.height;
    fmt.fourcc = FourCC::new(b"YUYV");
    let fmt = dev.set_format(&fmt)?;

    if fmt.fourcc != FourCC::new(b"YUYV") {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("device does not offer YUYV (got {})", fmt.fourcc),
        ));
    }

    if let Err(e) = dev.set_params(&Parameters::with_fps(fps)) {
        debug!("Frame interval not applied: {}", e);
    }

    Ok(Resolution::new(fmt.width, fmt.height))
}

fn capture_thread(
    path: PathBuf,
    requested: Resolution,
    fps: u32,
    track: TrackHandle,
    ready: oneshot::Sender<Result<Resolution>>,
) {
    let setup = Device::with_path(&path).and_then(|dev| {
        let resolution = configure(&dev, requested, fps)?;
        Ok((dev, resolution))
    });
    let (dev, resolution) = match setup {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(map_open_error(&path, e)));
            return;
        }
    };

    let mut stream = match Stream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(map_open_error(&path, e)));
            return;
        }
    };

    if ready.send(Ok(resolution)).is_err() {
        // Acquisition was abandoned while the device opened
        return;
    }

    let throttler = LogThrottler::default();
    let mut sequence = 0u64;
    let mut consecutive_errors = 0u32;

    while !track.is_ended() {
        match stream.next() {
            Ok((buf, _meta)) => {
                consecutive_errors = 0;
                let Some(rgba) = yuyv_to_rgba(buf, resolution) else {
                    warn_throttled!(throttler, "short_frame", "Dropping short frame ({} bytes)", buf.len());
                    continue;
                };
                if !track.push(MediaFrame::Video(VideoFrame::from_vec(rgba, resolution, sequence))) {
                    break;
                }
                sequence += 1;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn_throttled!(throttler, "dequeue", "Capture error on {}: {}", path.display(), e);
                // ENODEV: device unplugged
                if e.raw_os_error() == Some(19) || consecutive_errors > 30 {
                    warn!("Camera {} lost", path.display());
                    break;
                }
            }
        }
    }

    track.stop();
    debug!("Capture thread for {} exited after {} frames", path.display(), sequence);
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 limited range
///
/// Returns `None` when `src` is too short for `resolution`.
pub fn yuyv_to_rgba(src: &[u8], resolution: Resolution) -> Option<Vec<u8>> {
    let pixels = resolution.pixels() as usize;
    if src.len() < pixels * 2 {
        return None;
    }

    let mut out = Vec::with_capacity(pixels * 4);
    for chunk in src[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let (r, g, b) = yuv_to_rgb(y, u, v);
            out.extend_from_slice(&[r, g, b, 0xFF]);
        }
    }
    Some(out)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    (
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    )
}
