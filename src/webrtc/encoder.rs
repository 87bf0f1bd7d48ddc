//! Video encoding for the outgoing H.264 sender
//!
//! Frames arrive as RGBA, are converted to I420 and handed to a
//! [`VideoEncoder`]. The built-in implementation uses openh264 (the default
//! `openh264` feature) and honours the configured bitrate and frame rate;
//! hosts can plug in their own encoder through [`VideoEncoderFactory`].

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::media::{Resolution, VideoFrame};

/// One encoded access unit in Annex B format
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub data: Bytes,
    pub keyframe: bool,
}

pub trait VideoEncoder: Send {
    /// Encode one frame; `None` when the encoder skipped it
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedVideo>>;

    /// Make the next encoded frame a keyframe
    fn request_keyframe(&mut self);
}

pub trait VideoEncoderFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, resolution: Resolution, fps: u32, bitrate_kbps: u32) -> Result<Box<dyn VideoEncoder>>;
}

/// Factory used when no encoder is compiled in
pub struct UnavailableEncoderFactory;

impl VideoEncoderFactory for UnavailableEncoderFactory {
    fn name(&self) -> &str {
        "none"
    }

    fn create(&self, _resolution: Resolution, _fps: u32, _bitrate_kbps: u32) -> Result<Box<dyn VideoEncoder>> {
        Err(AppError::NotSupported(
            "no H.264 encoder available (build with the openh264 feature)".to_string(),
        ))
    }
}

/// The encoder factory this build provides
pub fn default_encoder_factory() -> Arc<dyn VideoEncoderFactory> {
    #[cfg(feature = "openh264")]
    {
        Arc::new(openh264_impl::OpenH264Factory)
    }
    #[cfg(not(feature = "openh264"))]
    {
        Arc::new(UnavailableEncoderFactory)
    }
}

/// Convert RGBA to planar I420 (BT.601)
///
/// Odd trailing rows and columns are dropped so both dimensions are even.
pub fn rgba_to_i420(rgba: &[u8], resolution: Resolution) -> (Vec<u8>, Resolution) {
    let src_w = resolution.width as usize;
    let w = src_w & !1;
    let h = resolution.height as usize & !1;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];
    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let i = (y * src_w + x) * 4;
            let (r, g, b) = (rgba[i] as i32, rgba[i + 1] as i32, rgba[i + 2] as i32);
            y_plane[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv = (y / 2) * (w / 2) + x / 2;
                u_plane[uv] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
                v_plane[uv] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            }
        }
    }

    (yuv, Resolution::new(w as u32, h as u32))
}

#[cfg(feature = "openh264")]
mod openh264_impl {
    use openh264::encoder::{
        BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode,
    };
    use openh264::formats::YUVBuffer;
    use openh264::OpenH264API;
    use tracing::debug;

    use super::*;

    /// Rate-control targets handed to openh264
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub(super) struct RateTargets {
        pub bitrate_bps: u32,
        pub max_fps: f32,
    }

    impl RateTargets {
        /// Zero values fall back to 1 fps / 100 kbps so the encoder never
        /// sees a degenerate target.
        pub fn new(fps: u32, bitrate_kbps: u32) -> Self {
            Self {
                bitrate_bps: bitrate_kbps.max(100).saturating_mul(1000),
                max_fps: fps.max(1) as f32,
            }
        }

        fn config(&self) -> EncoderConfig {
            EncoderConfig::new()
                .bitrate(BitRate::from_bps(self.bitrate_bps))
                .max_frame_rate(FrameRate::from_hz(self.max_fps))
                .rate_control_mode(RateControlMode::Bitrate)
        }
    }

    pub struct OpenH264Factory;

    impl VideoEncoderFactory for OpenH264Factory {
        fn name(&self) -> &str {
            "openh264"
        }

        fn create(&self, resolution: Resolution, fps: u32, bitrate_kbps: u32) -> Result<Box<dyn VideoEncoder>> {
            let targets = RateTargets::new(fps, bitrate_kbps);
            let encoder = Encoder::with_api_config(OpenH264API::from_source(), targets.config())
                .map_err(|e| AppError::Internal(format!("Failed to create H.264 encoder: {}", e)))?;
            debug!(
                "openh264 encoder for {} @ {} fps, {} bps",
                resolution, targets.max_fps, targets.bitrate_bps
            );
            Ok(Box::new(OpenH264Encoder { encoder }))
        }
    }

    struct OpenH264Encoder {
        encoder: Encoder,
    }

    impl VideoEncoder for OpenH264Encoder {
        fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedVideo>> {
            let (yuv, res) = rgba_to_i420(frame.data(), frame.resolution);
            if res.width == 0 || res.height == 0 {
                return Ok(None);
            }
            let buffer = YUVBuffer::from_vec(yuv, res.width as usize, res.height as usize);
            let bitstream = self
                .encoder
                .encode(&buffer)
                .map_err(|e| AppError::Internal(format!("H.264 encode failed: {}", e)))?;

            let keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
            let data = bitstream.to_vec();
            if data.is_empty() {
                return Ok(None);
            }
            Ok(Some(EncodedVideo {
                data: Bytes::from(data),
                keyframe,
            }))
        }

        fn request_keyframe(&mut self) {
            self.encoder.force_intra_frame();
        }
    }
}

/// Encoder that emits a tiny marker per frame, for tests without openh264
#[cfg(test)]
pub(crate) struct FakeEncoderFactory;

#[cfg(test)]
impl VideoEncoderFactory for FakeEncoderFactory {
    fn name(&self) -> &str {
        "fake"
    }

    fn create(&self, _resolution: Resolution, _fps: u32, _bitrate_kbps: u32) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FakeEncoder { keyframe: true }))
    }
}

#[cfg(test)]
struct FakeEncoder {
    keyframe: bool,
}

#[cfg(test)]
impl VideoEncoder for FakeEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<EncodedVideo>> {
        let keyframe = std::mem::take(&mut self.keyframe);
        let nal = if keyframe { 0x65 } else { 0x41 };
        let seq = (frame.sequence & 0xFF) as u8;
        Ok(Some(EncodedVideo {
            data: Bytes::from(vec![0, 0, 0, 1, nal, seq]),
            keyframe,
        }))
    }

    fn request_keyframe(&mut self) {
        self.keyframe = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_plane_sizes() {
        let res = Resolution::new(4, 2);
        let rgba = vec![255u8; 4 * 2 * 4];
        let (yuv, out) = rgba_to_i420(&rgba, res);
        assert_eq!(out, res);
        assert_eq!(yuv.len(), 8 + 2 + 2);
        assert_eq!(yuv[0], 235);
    }

    #[test]
    fn test_odd_dimensions_are_cropped() {
        let res = Resolution::new(5, 3);
        let rgba = vec![0u8; 5 * 3 * 4];
        let (yuv, out) = rgba_to_i420(&rgba, res);
        assert_eq!(out, Resolution::new(4, 2));
        assert_eq!(yuv.len(), 12);
        assert_eq!(yuv[0], 16);
    }

    #[cfg(feature = "openh264")]
    #[test]
    fn test_rate_targets_follow_settings() {
        use super::openh264_impl::RateTargets;

        let targets = RateTargets::new(24, 2500);
        assert_eq!(targets.bitrate_bps, 2_500_000);
        assert_eq!(targets.max_fps, 24.0);

        let floor = RateTargets::new(0, 0);
        assert_eq!(floor.bitrate_bps, 100_000);
        assert_eq!(floor.max_fps, 1.0);
    }

    #[cfg(feature = "openh264")]
    #[test]
    fn test_openh264_first_frame_is_keyframe() {
        let mut encoder = default_encoder_factory()
            .create(Resolution::new(64, 48), 15, 300)
            .unwrap();
        let frame = VideoFrame::blank(Resolution::new(64, 48), 0);
        let encoded = encoder.encode(&frame).unwrap().unwrap();
        assert!(encoded.keyframe);
        assert!(encoded.data.starts_with(&[0, 0, 0, 1]));
    }

    #[cfg(not(feature = "openh264"))]
    #[test]
    fn test_without_encoder_feature() {
        let err = default_encoder_factory()
            .create(Resolution::HD720, 30, 2500)
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotSupported(_)));
    }
}
