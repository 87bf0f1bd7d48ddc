//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::capture::SourceKind;
use crate::compositor::OverlayLayout;
use crate::error::ErrorCode;
use crate::media::MediaKind;
use crate::session::{SessionState, SourceMode};
use crate::webrtc::ConnectionState;

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "state": "live", "mode": "camera" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Session Events
    // ============================================================================
    /// Controller state changed
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        state: SessionState,
        /// Active source mode, if any
        mode: Option<SourceMode>,
    },

    /// An error surfaced to the host
    #[serde(rename = "session.error")]
    SessionError {
        code: ErrorCode,
        message: String,
        /// Whether explicit user action is required to recover
        terminal: bool,
    },

    /// Published source changed while live
    #[serde(rename = "session.source_switched")]
    SourceSwitched {
        from: Option<SourceMode>,
        to: SourceMode,
    },

    /// Overlay layout changed
    #[serde(rename = "session.layout_changed")]
    LayoutChanged { layout: OverlayLayout },

    /// Mute-in-place flag changed
    #[serde(rename = "session.track_toggled")]
    TrackToggled { kind: MediaKind, enabled: bool },

    // ============================================================================
    // Peer Events
    // ============================================================================
    /// Peer connection state changed
    #[serde(rename = "peer.connection_state")]
    PeerConnectionState {
        session_id: String,
        state: ConnectionState,
    },

    /// Reconnection attempt scheduled
    #[serde(rename = "peer.reconnecting")]
    PeerReconnecting { attempt: u32, delay_ms: u64 },

    // ============================================================================
    // Capture Events
    // ============================================================================
    /// A capture source stopped delivering (e.g. screen sharing revoked)
    #[serde(rename = "capture.source_lost")]
    SourceLost { kind: SourceKind, source_id: String },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::SessionError { .. } => "session.error",
            Self::SourceSwitched { .. } => "session.source_switched",
            Self::LayoutChanged { .. } => "session.layout_changed",
            Self::TrackToggled { .. } => "session.track_toggled",
            Self::PeerConnectionState { .. } => "peer.connection_state",
            Self::PeerReconnecting { .. } => "peer.reconnecting",
            Self::SourceLost { .. } => "capture.source_lost",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `session.*` matches all session events
    /// - `session.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
