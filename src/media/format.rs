//! Pixel layouts and picture sizes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel layouts seen between capture and encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Packed 8-bit RGBA, the raster format of the pipeline
    Rgba,
    /// Packed 4:2:2 as delivered by most UVC cameras
    Yuyv,
    /// Planar 4:2:0, encoder input
    I420,
}

impl PixelFormat {
    /// Bytes in one picture of `resolution`
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::Rgba => pixels * 4,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::I420 => pixels * 3 / 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::I420 => "I420",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const VGA: Resolution = Resolution::new(640, 480);
    pub const HD720: Resolution = Resolution::new(1280, 720);
    pub const HD1080: Resolution = Resolution::new(1920, 1080);
    pub const UHD4K: Resolution = Resolution::new(3840, 2160);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let res = Resolution::new(4, 2);
        assert_eq!(PixelFormat::Rgba.frame_size(res), 32);
        assert_eq!(PixelFormat::Yuyv.frame_size(res), 16);
        assert_eq!(PixelFormat::I420.frame_size(res), 12);
    }

    #[test]
    fn test_named_sizes() {
        assert_eq!(Resolution::HD1080.to_string(), "1920x1080");
        assert_eq!(Resolution::UHD4K.pixels(), 3840 * 2160);
    }
}
