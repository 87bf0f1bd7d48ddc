pub mod config;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::capture::{CaptureConstraints, ResolutionTier};
use crate::compositor::{OverlayLayout, OverlayPosition, OverlaySize};
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::media::MediaKind;
use crate::session::{SessionStatus, SourceMode};
use crate::state::AppState;

// ============================================================================
// Health & Info
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// System info response
#[derive(Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub build_date: &'static str,
    pub capture_backend: String,
    pub encoder: String,
}

pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<SystemInfo> {
    Json(SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        capture_backend: state.capture_backend.clone(),
        encoder: state.encoder.clone(),
    })
}

// ============================================================================
// Session
// ============================================================================

/// Session operation response (unified success format)
#[derive(Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub status: SessionStatus,
}

impl SessionResponse {
    fn ok(status: SessionStatus) -> Json<Self> {
        Json(Self {
            success: true,
            status,
        })
    }
}

pub async fn session_status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(state.session.status())
}

/// Start request; omitted fields fall back to the capture config
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    pub mode: Option<SourceMode>,
    pub resolution: Option<ResolutionTier>,
    pub fps: Option<u32>,
    pub audio: Option<bool>,
}

impl StartSessionRequest {
    fn resolve(&self, defaults: &CaptureConfig) -> (SourceMode, CaptureConstraints) {
        let mode = self.mode.unwrap_or(defaults.mode);
        let mut constraints = CaptureConstraints::new(
            self.resolution.unwrap_or(defaults.resolution),
            self.fps.unwrap_or(defaults.fps),
        );
        if let Some(audio) = self.audio {
            constraints.audio = audio;
        }
        (mode, constraints)
    }
}

pub async fn session_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<SessionResponse>> {
    let (mode, constraints) = req.resolve(&state.config.get().capture);
    info!("Start requested: {} ({})", mode, constraints.resolution);
    state.session.start(mode, constraints).await?;
    Ok(SessionResponse::ok(state.session.status()))
}

pub async fn session_stop(State(state): State<Arc<AppState>>) -> Result<Json<SessionResponse>> {
    state.session.stop().await?;
    Ok(SessionResponse::ok(state.session.status()))
}

#[derive(Debug, Deserialize)]
pub struct SwitchSourceRequest {
    pub mode: SourceMode,
}

pub async fn session_switch_source(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwitchSourceRequest>,
) -> Result<Json<SessionResponse>> {
    state.session.switch_source(req.mode).await?;
    Ok(SessionResponse::ok(state.session.status()))
}

/// Layout request; omitted fields keep their current value
#[derive(Debug, Default, Deserialize)]
pub struct LayoutRequest {
    pub position: Option<OverlayPosition>,
    pub size: Option<OverlaySize>,
}

impl LayoutRequest {
    fn apply(&self, current: OverlayLayout) -> OverlayLayout {
        OverlayLayout::new(
            self.position.unwrap_or(current.position),
            self.size.unwrap_or(current.size),
        )
    }
}

pub async fn session_layout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LayoutRequest>,
) -> Result<Json<SessionResponse>> {
    let layout = req.apply(state.session.status().layout);
    state.session.update_layout(layout).await?;
    Ok(SessionResponse::ok(state.session.status()))
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub success: bool,
    pub kind: MediaKind,
    pub enabled: bool,
}

pub async fn session_toggle_video(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ToggleResponse>> {
    let enabled = state.session.toggle_video().await?;
    Ok(Json(ToggleResponse {
        success: true,
        kind: MediaKind::Video,
        enabled,
    }))
}

pub async fn session_toggle_audio(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ToggleResponse>> {
    let enabled = state.session.toggle_audio().await?;
    Ok(Json(ToggleResponse {
        success: true,
        kind: MediaKind::Audio,
        enabled,
    }))
}
