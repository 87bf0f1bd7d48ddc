//! Session descriptions and connection state

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::error::{AppError, Result};

/// Local SDP offer, final once ICE gathering finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }

    /// Number of `m=` sections
    pub fn media_sections(&self) -> usize {
        media_sections(&self.sdp)
    }

    /// Number of `a=candidate` lines embedded in the offer
    pub fn candidate_count(&self) -> usize {
        self.sdp
            .lines()
            .filter(|l| l.trim_start().starts_with("a=candidate:"))
            .count()
    }
}

/// Remote SDP answer returned by the ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp: String,
}

impl SdpAnswer {
    /// Reject answers that cannot complete the handshake
    pub fn parse(sdp: impl Into<String>) -> Result<Self> {
        let sdp = sdp.into();
        if sdp.trim().is_empty() {
            return Err(AppError::NegotiationFailed("empty answer".to_string()));
        }
        if !sdp.trim_start().starts_with("v=") {
            return Err(AppError::NegotiationFailed(
                "answer is not an SDP document".to_string(),
            ));
        }
        if media_sections(&sdp) == 0 {
            return Err(AppError::NegotiationFailed(
                "answer has no media sections".to_string(),
            ));
        }
        Ok(Self { sdp })
    }
}

fn media_sections(sdp: &str) -> usize {
    sdp.lines().filter(|l| l.starts_with("m=")).count()
}

/// Peer connection state as observed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
