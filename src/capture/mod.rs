//! Capture sources
//!
//! [`CaptureSourceManager`] acquires camera and screen sources through a
//! [`CaptureBackend`] and reports sources that end on their own.

mod backend;
mod manager;
mod synthetic;
mod types;
mod v4l2;

pub use backend::{CaptureBackend, OpenedSource};
pub use manager::CaptureSourceManager;
pub use synthetic::{render_pattern, SyntheticBackend, SyntheticFailure};
pub use types::{CaptureConstraints, CaptureSource, ResolutionTier, SourceEvent, SourceKind};
pub use v4l2::{yuyv_to_rgba, V4l2Backend};
