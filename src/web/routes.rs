use axum::{
    routing::{any, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let info_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/info", get(handlers::system_info))
        .route("/config", get(handlers::config::get_config))
        .route("/config/ingest", patch(handlers::config::update_ingest_config))
        .route("/config/session", patch(handlers::config::update_session_config))
        // WebSocket endpoint for real-time events
        .route("/ws", any(ws_handler));

    let session_routes = Router::new()
        .route("/session", get(handlers::session_status))
        .route("/session/start", post(handlers::session_start))
        .route("/session/stop", post(handlers::session_stop))
        .route("/session/source", post(handlers::session_switch_source))
        .route("/session/layout", post(handlers::session_layout))
        .route("/session/toggle/video", post(handlers::session_toggle_video))
        .route("/session/toggle/audio", post(handlers::session_toggle_audio));

    let api_routes = Router::new().merge(info_routes).merge(session_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
