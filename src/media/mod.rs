//! Media primitives shared by capture, compositing and publishing
//!
//! ```text
//! CaptureBackend ──► TrackHandle ──┬──► Compositor ──► TrackHandle (synthetic)
//!                                  │                          │
//!                                  └──────────────────────────┴──► PeerSession senders
//! ```

pub mod format;
pub mod frame;
pub mod track;

pub use format::{PixelFormat, Resolution};
pub use frame::{AudioFrame, VideoFrame};
pub use track::{MediaFrame, MediaKind, TrackHandle};
