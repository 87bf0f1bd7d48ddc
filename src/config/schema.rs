use serde::{Deserialize, Serialize};

use crate::capture::{ResolutionTier, SourceKind};
use crate::compositor::OverlayLayout;
use crate::session::SourceMode;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// WHIP ingest endpoint settings
    pub ingest: IngestConfig,
    /// Peer connection settings
    pub webrtc: WebRtcConfig,
    /// Capture defaults
    pub capture: CaptureConfig,
    /// Hybrid-mode compositor settings
    pub compositor: CompositorConfig,
    /// Automatic reconnection after a failed live connection
    pub reconnect: ReconnectConfig,
    /// Control API server settings
    pub web: WebConfig,
}

/// WHIP ingest configuration
///
/// The stream key and base URL come from the stream-metadata layer; they are
/// plain inputs here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Ingest base URL (e.g. https://ingest.example.com)
    pub base_url: String,
    /// Stream key
    pub stream_key: String,
    /// Endpoint template; `{base}` and `{key}` are substituted
    pub path_template: String,
    /// Optional bearer token sent as `Authorization`
    pub bearer_token: Option<String>,
    /// Bound on the signaling round trip in milliseconds
    pub timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            stream_key: String::new(),
            path_template: "{base}/{key}/whip".to_string(),
            bearer_token: None,
            timeout_ms: 10_000,
        }
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Upper bound on ICE gathering before the offer is sent anyway (ms)
    pub ice_gathering_timeout_ms: u64,
    /// Target video bitrate in kbps
    pub bitrate_kbps: u32,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: vec![],
            ice_gathering_timeout_ms: 5000,
            bitrate_kbps: 2500,
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Capture backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackendKind {
    /// Generated test pattern and silence
    #[default]
    Synthetic,
    /// Linux V4L2 camera (no screen capture)
    V4l2,
}

/// Capture defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Backend used to open devices
    pub backend: CaptureBackendKind,
    /// Camera device path for the V4L2 backend
    pub camera_device: String,
    /// Default resolution tier
    pub resolution: ResolutionTier,
    /// Default frame rate
    pub fps: u32,
    /// Default source mode used by the start endpoint
    pub mode: SourceMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackendKind::Synthetic,
            camera_device: "/dev/video0".to_string(),
            resolution: ResolutionTier::Hd720,
            fps: 30,
            mode: SourceMode::Camera,
        }
    }
}

/// Which source is drawn full-frame in hybrid mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HybridPrimary {
    #[default]
    Screen,
    Camera,
}

impl HybridPrimary {
    pub fn kind(&self) -> SourceKind {
        match self {
            HybridPrimary::Screen => SourceKind::Screen,
            HybridPrimary::Camera => SourceKind::Camera,
        }
    }
}

/// Compositor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositorConfig {
    /// Render cadence
    pub fps: u32,
    /// Full-frame source in hybrid mode
    pub hybrid_primary: HybridPrimary,
    /// Initial overlay layout
    pub layout: OverlayLayout,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            hybrid_primary: HybridPrimary::Screen,
            layout: OverlayLayout::default(),
        }
    }
}

/// Reconnection policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Automatic attempts after a live connection fails
    pub max_attempts: u32,
    /// Fixed delay before each attempt (ms)
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 2000,
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}
