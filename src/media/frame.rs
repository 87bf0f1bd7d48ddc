//! Frames carried on tracks

use bytes::Bytes;
use std::time::Duration;

use super::format::{PixelFormat, Resolution};

/// Raw video picture
///
/// Always packed RGBA inside the pipeline, so the compositor blits without
/// per-format branches. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Producer-assigned, monotonically increasing
    pub sequence: u64,
}

impl VideoFrame {
    pub fn rgba(data: Bytes, resolution: Resolution, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format: PixelFormat::Rgba,
            sequence,
        }
    }

    pub fn from_vec(data: Vec<u8>, resolution: Resolution, sequence: u64) -> Self {
        Self::rgba(Bytes::from(data), resolution, sequence)
    }

    /// Opaque black picture
    pub fn blank(resolution: Resolution, sequence: u64) -> Self {
        let data = [0u8, 0, 0, 0xFF].repeat(resolution.pixels() as usize);
        Self::from_vec(data, resolution, sequence)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Buffer length agrees with the declared geometry
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.frame_size(self.resolution)
    }
}

/// One Opus packet (48 kHz)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Bytes,
    pub duration_ms: u32,
    pub sequence: u64,
}

impl AudioFrame {
    /// 20 ms CELT silence packet
    pub const SILENCE: &'static [u8] = &[0xF8, 0xFF, 0xFE];

    pub fn new(data: Bytes, duration_ms: u32, sequence: u64) -> Self {
        Self {
            data,
            duration_ms,
            sequence,
        }
    }

    pub fn silence(sequence: u64) -> Self {
        Self::new(Bytes::from_static(Self::SILENCE), 20, sequence)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }
}
