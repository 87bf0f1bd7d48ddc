//! Session state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::{CaptureConstraints, SourceKind};
use crate::compositor::OverlayLayout;
use crate::config::ReconnectConfig;
use crate::error::ErrorInfo;
use crate::webrtc::ConnectionState;

/// Controller state
///
/// `Idle -> Initializing -> Live -> Switching -> Live | Stopped | Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Initializing,
    Live,
    Switching,
    Stopped,
    Error,
}

impl SessionState {
    /// States from which `start()` is accepted
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Error
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Live => "live",
            SessionState::Switching => "switching",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// What is being published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Camera,
    Screen,
    Hybrid,
}

impl SourceMode {
    pub fn uses(&self, kind: SourceKind) -> bool {
        match self {
            SourceMode::Camera => kind == SourceKind::Camera,
            SourceMode::Screen => kind == SourceKind::Screen,
            SourceMode::Hybrid => true,
        }
    }

    /// Mode publishing only `kind`
    pub fn single(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Camera => SourceMode::Camera,
            SourceKind::Screen => SourceMode::Screen,
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceMode::Camera => "camera",
            SourceMode::Screen => "screen",
            SourceMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Automatic reconnection after a failed live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::from_millis(2000),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Snapshot exposed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub mode: Option<SourceMode>,
    pub constraints: Option<CaptureConstraints>,
    pub layout: OverlayLayout,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    /// Peer session id while one exists
    pub peer_id: Option<String>,
    pub connection: Option<ConnectionState>,
    pub reconnect_attempts: u32,
    /// When the current publication went live
    pub live_since: Option<DateTime<Utc>>,
    /// Last error surfaced, cleared on the next successful start
    pub error: Option<ErrorInfo>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            mode: None,
            constraints: None,
            layout: OverlayLayout::default(),
            video_enabled: true,
            audio_enabled: true,
            peer_id: None,
            connection: None,
            reconnect_attempts: 0,
            live_since: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_uses() {
        assert!(SourceMode::Hybrid.uses(SourceKind::Camera));
        assert!(SourceMode::Hybrid.uses(SourceKind::Screen));
        assert!(!SourceMode::Camera.uses(SourceKind::Screen));
        assert_eq!(SourceMode::single(SourceKind::Screen), SourceMode::Screen);
    }

    #[test]
    fn test_can_start() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Error.can_start());
        assert!(!SessionState::Live.can_start());
        assert!(!SessionState::Switching.can_start());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&SessionState::Live).unwrap(), "\"live\"");
        let mode: SourceMode = serde_json::from_str("\"hybrid\"").unwrap();
        assert_eq!(mode, SourceMode::Hybrid);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = ReconnectPolicy::from(&ReconnectConfig {
            max_attempts: 3,
            delay_ms: 500,
        });
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(500));
    }
}
