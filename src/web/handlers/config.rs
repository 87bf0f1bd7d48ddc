//! Configuration query and update
//!
//! - GET   /api/config         - current configuration with secrets masked
//! - PATCH /api/config/ingest  - update ingest endpoint settings
//! - PATCH /api/config/session - update compositor and reconnect settings
//!
//! Updates are persisted through the [`ConfigStore`](crate::config::ConfigStore);
//! the session controller picks them up from the store's change feed.

use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::compositor::OverlayLayout;
use crate::config::{AppConfig, CompositorConfig, HybridPrimary, IngestConfig, ReconnectConfig};
use crate::error::{AppError, Result};
use crate::state::AppState;

const MASK: &str = "********";

fn sanitize_config_for_api(config: &mut AppConfig) {
    // Ingest secrets
    if !config.ingest.stream_key.is_empty() {
        config.ingest.stream_key = MASK.to_string();
    }
    if config.ingest.bearer_token.is_some() {
        config.ingest.bearer_token = Some(MASK.to_string());
    }

    // TURN secrets
    for server in &mut config.webrtc.turn_servers {
        server.credential = MASK.to_string();
    }
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    let mut config = (*state.config.get()).clone();
    sanitize_config_for_api(&mut config);
    Json(config)
}


fn masked_ingest(config: &AppConfig) -> IngestConfig {
    let mut config = config.clone();
    sanitize_config_for_api(&mut config);
    config.ingest
}

/// Partial update of the `[ingest]` section
///
/// A secret sent back as the mask (as returned by `GET /api/config`) leaves
/// the stored value untouched; an empty bearer token clears it.
#[derive(Debug, Default, Deserialize)]
pub struct IngestConfigUpdate {
    pub base_url: Option<String>,
    pub stream_key: Option<String>,
    pub path_template: Option<String>,
    pub bearer_token: Option<String>,
    /// Signaling round-trip bound (ms)
    pub timeout_ms: Option<u64>,
}

impl IngestConfigUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref url) = self.base_url {
            if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Config(
                    "ingest base_url must start with http:// or https://".into(),
                ));
            }
        }
        if let Some(ref template) = self.path_template {
            if !template.contains("{key}") {
                return Err(AppError::Config(
                    "ingest path_template must contain {key}".into(),
                ));
            }
        }
        if let Some(timeout) = self.timeout_ms {
            if !(500..=60_000).contains(&timeout) {
                return Err(AppError::Config(
                    "ingest timeout_ms must be between 500 and 60000".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut IngestConfig) {
        if let Some(ref url) = self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ref key) = self.stream_key {
            if key != MASK {
                config.stream_key = key.clone();
            }
        }
        if let Some(ref template) = self.path_template {
            config.path_template = template.clone();
        }
        if let Some(ref token) = self.bearer_token {
            if token != MASK {
                config.bearer_token = if token.is_empty() { None } else { Some(token.clone()) };
            }
        }
        if let Some(timeout) = self.timeout_ms {
            config.timeout_ms = timeout;
        }
    }
}

/// Update the ingest configuration
pub async fn update_ingest_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestConfigUpdate>,
) -> Result<Json<IngestConfig>> {
    req.validate()?;
    state
        .config
        .update(|config| req.apply_to(&mut config.ingest))
        .await?;
    Ok(Json(masked_ingest(&state.config.get())))
}

/// Partial update of the compositor and reconnect settings
#[derive(Debug, Default, Deserialize)]
pub struct SessionConfigUpdate {
    pub compositor_fps: Option<u32>,
    pub hybrid_primary: Option<HybridPrimary>,
    /// Layout used when the next session starts
    pub layout: Option<OverlayLayout>,
    pub reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
}

/// Compositor and reconnect sections as returned by the session update
#[derive(Debug, serde::Serialize)]
pub struct SessionConfigResponse {
    pub compositor: CompositorConfig,
    pub reconnect: ReconnectConfig,
}

impl SessionConfigUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(fps) = self.compositor_fps {
            if !(1..=60).contains(&fps) {
                return Err(AppError::Config("compositor_fps must be between 1 and 60".into()));
            }
        }
        if let Some(attempts) = self.reconnect_attempts {
            if attempts > 10 {
                return Err(AppError::Config("reconnect_attempts must be at most 10".into()));
            }
        }
        if let Some(delay) = self.reconnect_delay_ms {
            if delay > 60_000 {
                return Err(AppError::Config(
                    "reconnect_delay_ms must be at most 60000".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(fps) = self.compositor_fps {
            config.compositor.fps = fps;
        }
        if let Some(primary) = self.hybrid_primary {
            config.compositor.hybrid_primary = primary;
        }
        if let Some(layout) = self.layout {
            config.compositor.layout = layout;
        }
        if let Some(attempts) = self.reconnect_attempts {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(delay) = self.reconnect_delay_ms {
            config.reconnect.delay_ms = delay;
        }
    }
}

/// Update compositor and reconnect settings
pub async fn update_session_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionConfigUpdate>,
) -> Result<Json<SessionConfigResponse>> {
    req.validate()?;
    state.config.update(|config| req.apply_to(config)).await?;
    let config = state.config.get();
    Ok(Json(SessionConfigResponse {
        compositor: config.compositor.clone(),
        reconnect: config.reconnect.clone(),
    }))
}
