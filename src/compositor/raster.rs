//! RGBA raster surface

use super::layout::Rect;
use crate::media::{PixelFormat, Resolution, VideoFrame};

pub const BLACK: [u8; 4] = [0, 0, 0, 0xFF];

/// Reusable RGBA drawing surface
pub struct Surface {
    resolution: Resolution,
    data: Vec<u8>,
}

impl Surface {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            data: vec![0; PixelFormat::Rgba.frame_size(resolution)],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Draw `frame` scaled (nearest neighbour) into `dest`
    ///
    /// The part of `dest` outside the surface is skipped. Malformed frames
    /// are ignored.
    pub fn draw_scaled(&mut self, frame: &VideoFrame, dest: Rect) {
        if dest.is_empty() || !frame.is_well_formed() || frame.width() == 0 || frame.height() == 0 {
            return;
        }

        let src = frame.data();
        let (src_w, src_h) = (frame.width() as u64, frame.height() as u64);
        let surface_w = self.resolution.width;
        let x_end = dest.right().min(surface_w);
        let y_end = dest.bottom().min(self.resolution.height);

        for y in dest.y..y_end {
            let sy = ((y - dest.y) as u64 * src_h / dest.height as u64) as usize;
            let src_row = sy * src_w as usize * 4;
            let dst_row = (y * surface_w) as usize * 4;

            for x in dest.x..x_end {
                let sx = ((x - dest.x) as u64 * src_w / dest.width as u64) as usize;
                let s = src_row + sx * 4;
                let d = dst_row + x as usize * 4;
                self.data[d..d + 4].copy_from_slice(&src[s..s + 4]);
            }
        }
    }

    /// Draw `frame` over the whole surface
    pub fn draw_full(&mut self, frame: &VideoFrame) {
        let full = Rect::new(0, 0, self.resolution.width, self.resolution.height);
        self.draw_scaled(frame, full);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let i = ((y * self.resolution.width + x) * 4) as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[i..i + 4]);
        Some(px)
    }

    /// Snapshot the surface as a frame
    pub fn to_frame(&self, sequence: u64) -> VideoFrame {
        VideoFrame::from_vec(self.data.clone(), self.resolution, sequence)
    }
}

/// Read one pixel from an RGBA frame
pub fn frame_pixel(frame: &VideoFrame, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= frame.width() || y >= frame.height() {
        return None;
    }
    let i = ((y * frame.width() + x) * 4) as usize;
    frame.data().get(i..i + 4).map(|s| [s[0], s[1], s[2], s[3]])
}

#[cfg(test)]
pub(crate) fn solid_frame(resolution: Resolution, color: [u8; 4], sequence: u64) -> VideoFrame {
    let mut data = vec![0u8; PixelFormat::Rgba.frame_size(resolution)];
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&color);
    }
    VideoFrame::from_vec(data, resolution, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    #[test]
    fn test_full_draw_upscales() {
        let mut surface = Surface::new(Resolution::new(8, 6));
        surface.fill(BLACK);
        surface.draw_full(&solid_frame(Resolution::new(2, 2), RED, 0));
        assert_eq!(surface.pixel(0, 0), Some(RED));
        assert_eq!(surface.pixel(7, 5), Some(RED));
    }

    #[test]
    fn test_draw_into_rect_only_touches_rect() {
        let mut surface = Surface::new(Resolution::new(10, 10));
        surface.fill(BLACK);
        surface.draw_scaled(&solid_frame(Resolution::new(4, 4), GREEN, 0), Rect::new(6, 6, 3, 3));
        assert_eq!(surface.pixel(5, 5), Some(BLACK));
        assert_eq!(surface.pixel(6, 6), Some(GREEN));
        assert_eq!(surface.pixel(8, 8), Some(GREEN));
        assert_eq!(surface.pixel(9, 9), Some(BLACK));
    }

    #[test]
    fn test_rect_past_edge_is_clipped() {
        let mut surface = Surface::new(Resolution::new(4, 4));
        surface.fill(BLACK);
        surface.draw_scaled(&solid_frame(Resolution::new(2, 2), RED, 0), Rect::new(2, 2, 8, 8));
        assert_eq!(surface.pixel(3, 3), Some(RED));
        assert_eq!(surface.pixel(1, 1), Some(BLACK));
    }

    #[test]
    fn test_downscale_picks_source_pixels() {
        let res = Resolution::new(4, 1);
        let mut data = Vec::new();
        for color in [RED, RED, GREEN, GREEN] {
            data.extend_from_slice(&color);
        }
        let frame = VideoFrame::from_vec(data, res, 0);
        let mut surface = Surface::new(Resolution::new(2, 1));
        surface.draw_full(&frame);
        assert_eq!(surface.pixel(0, 0), Some(RED));
        assert_eq!(surface.pixel(1, 0), Some(GREEN));
        assert_eq!(frame_pixel(&surface.to_frame(1), 1, 0), Some(GREEN));
    }
}
