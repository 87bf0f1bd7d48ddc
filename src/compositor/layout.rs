//! Overlay layout engine
//!
//! Maps an [`OverlayLayout`] and surface dimensions to the pixel rectangle
//! the secondary source is drawn into. Pure and allocation free, called
//! once per rendered frame.

use serde::{Deserialize, Serialize};

/// Width of the surface the size tiers and padding are defined against
pub const REFERENCE_WIDTH: u32 = 640;

/// Margin between the overlay and the surface edges at reference width
pub const REFERENCE_PADDING: u32 = 16;

/// Corner the overlay is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl OverlayPosition {
    pub const ALL: [OverlayPosition; 4] = [
        OverlayPosition::TopLeft,
        OverlayPosition::TopRight,
        OverlayPosition::BottomLeft,
        OverlayPosition::BottomRight,
    ];

    fn is_left(&self) -> bool {
        matches!(self, OverlayPosition::TopLeft | OverlayPosition::BottomLeft)
    }

    fn is_top(&self) -> bool {
        matches!(self, OverlayPosition::TopLeft | OverlayPosition::TopRight)
    }
}

/// Overlay size tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlaySize {
    Small,
    #[default]
    Medium,
    Large,
}

impl OverlaySize {
    pub const ALL: [OverlaySize; 3] = [OverlaySize::Small, OverlaySize::Medium, OverlaySize::Large];

    /// Dimensions at [`REFERENCE_WIDTH`]
    pub fn reference_dimensions(&self) -> (u32, u32) {
        match self {
            OverlaySize::Small => (128, 96),
            OverlaySize::Medium => (192, 144),
            OverlaySize::Large => (256, 192),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverlayLayout {
    #[serde(default)]
    pub position: OverlayPosition,
    #[serde(default)]
    pub size: OverlaySize,
}

impl OverlayLayout {
    pub fn new(position: OverlayPosition, size: OverlaySize) -> Self {
        Self { position, size }
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

fn scale(value: u32, surface_width: u32) -> u32 {
    ((value as u64 * surface_width as u64) / REFERENCE_WIDTH as u64) as u32
}

/// Padding for a surface of the given width
pub fn scaled_padding(surface_width: u32) -> u32 {
    scale(REFERENCE_PADDING, surface_width)
}

/// Compute where the overlay goes on a `surface_width` x `surface_height`
/// surface
///
/// Size and padding scale with the surface width. An overlay that would
/// not fit is clamped to the surface and the padding shrinks first.
///
/// # Example
///
/// ```rust
/// use live_publisher::compositor::layout::{
///     compute_overlay_rect, OverlayLayout, OverlayPosition, OverlaySize,
/// };
///
/// let layout = OverlayLayout::new(OverlayPosition::BottomRight, OverlaySize::Medium);
/// let rect = compute_overlay_rect(1280, 720, layout);
/// assert_eq!(rect.right() + 32, 1280);
/// assert_eq!(rect.bottom() + 32, 720);
/// ```
pub fn compute_overlay_rect(surface_width: u32, surface_height: u32, layout: OverlayLayout) -> Rect {
    let (ref_w, ref_h) = layout.size.reference_dimensions();
    let width = scale(ref_w, surface_width).min(surface_width);
    let height = scale(ref_h, surface_width).min(surface_height);
    let padding = scaled_padding(surface_width);

    let pad_x = padding.min(surface_width - width);
    let pad_y = padding.min(surface_height - height);

    let x = if layout.position.is_left() {
        pad_x
    } else {
        surface_width - width - pad_x
    };
    let y = if layout.position.is_top() {
        pad_y
    } else {
        surface_height - height - pad_y
    };

    Rect::new(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACES: [(u32, u32); 6] = [
        (640, 480),
        (1280, 720),
        (1920, 1080),
        (3840, 2160),
        (800, 600),
        (1080, 1920),
    ];

    #[test]
    fn test_reference_dimensions() {
        let rect = compute_overlay_rect(640, 480, OverlayLayout::new(OverlayPosition::TopLeft, OverlaySize::Small));
        assert_eq!(rect, Rect::new(16, 16, 128, 96));

        let rect = compute_overlay_rect(640, 480, OverlayLayout::new(OverlayPosition::BottomRight, OverlaySize::Large));
        assert_eq!(rect, Rect::new(640 - 256 - 16, 480 - 192 - 16, 256, 192));
    }

    #[test]
    fn test_every_layout_is_contained_and_padded() {
        for (sw, sh) in SURFACES {
            let padding = scaled_padding(sw);
            for position in OverlayPosition::ALL {
                for size in OverlaySize::ALL {
                    let layout = OverlayLayout::new(position, size);
                    let rect = compute_overlay_rect(sw, sh, layout);

                    assert!(rect.right() <= sw && rect.bottom() <= sh, "{:?} on {}x{}", layout, sw, sh);
                    assert!(!rect.is_empty());

                    let left = rect.x;
                    let top = rect.y;
                    let right = sw - rect.right();
                    let bottom = sh - rect.bottom();

                    match position {
                        OverlayPosition::TopLeft => {
                            assert_eq!((left, top), (padding, padding));
                        }
                        OverlayPosition::TopRight => {
                            assert_eq!((right, top), (padding, padding));
                        }
                        OverlayPosition::BottomLeft => {
                            assert_eq!((left, bottom), (padding, padding));
                        }
                        OverlayPosition::BottomRight => {
                            assert_eq!((right, bottom), (padding, padding));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_scales_with_output_width() {
        let layout = OverlayLayout::new(OverlayPosition::TopLeft, OverlaySize::Medium);
        let rect = compute_overlay_rect(1280, 720, layout);
        assert_eq!((rect.width, rect.height), (384, 288));
        assert_eq!((rect.x, rect.y), (32, 32));
    }

    #[test]
    fn test_padding_is_fixed_at_reference_width() {
        assert_eq!(scaled_padding(640), 16);
        assert_eq!(scaled_padding(1280), 32);
        assert_eq!(scaled_padding(1920), 48);
    }

    #[test]
    fn test_tiny_surface_is_clamped() {
        for position in OverlayPosition::ALL {
            let rect = compute_overlay_rect(100, 20, OverlayLayout::new(position, OverlaySize::Large));
            assert!(rect.right() <= 100);
            assert!(rect.bottom() <= 20);
        }
        let rect = compute_overlay_rect(0, 0, OverlayLayout::default());
        assert!(rect.is_empty());
    }

    #[test]
    fn test_layout_serde() {
        let layout: OverlayLayout = serde_json::from_str(r#"{"position":"top_right","size":"large"}"#).unwrap();
        assert_eq!(layout, OverlayLayout::new(OverlayPosition::TopRight, OverlaySize::Large));
        assert_eq!(OverlayLayout::default().position, OverlayPosition::BottomRight);
    }
}
