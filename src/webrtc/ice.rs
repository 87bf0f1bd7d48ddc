//! ICE server list

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::WebRtcConfig;

/// One STUN or TURN entry handed to the peer session at open time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    /// STUN entries first, then TURN
    pub fn from_config(config: &WebRtcConfig) -> Vec<IceServer> {
        let stun = config
            .stun_servers
            .iter()
            .filter(|url| !url.trim().is_empty())
            .map(IceServer::stun);
        let turn = config.turn_servers.iter().map(|t| IceServer {
            urls: t.urls.clone(),
            username: t.username.clone(),
            credential: t.credential.clone(),
        });
        stun.chain(turn).collect()
    }

    pub fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone(),
            credential: self.credential.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn test_from_config_orders_stun_first() {
        let config = WebRtcConfig {
            stun_servers: vec!["stun:a:3478".into(), " ".into()],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:b:3478".into()],
                username: "u".into(),
                credential: "p".into(),
            }],
            ..Default::default()
        };
        let servers = IceServer::from_config(&config);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0], IceServer::stun("stun:a:3478"));
        assert_eq!(servers[1].to_rtc().username, "u");
    }

    #[test]
    fn test_default_config_uses_public_stun() {
        let servers = IceServer::from_config(&WebRtcConfig::default());
        assert!(servers.iter().all(|s| s.urls[0].starts_with("stun:")));
        assert!(!servers.is_empty());
    }
}
