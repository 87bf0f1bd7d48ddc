//! live-publisher - camera/screen publishing over WebRTC
//!
//! Captures a camera, a screen or both (composited picture-in-picture),
//! and publishes them to a WHIP ingest over a single peer connection
//! whose senders are re-pointed in place when the source changes.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod session;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
