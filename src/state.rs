use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::session::SessionHandle;

/// Application-wide state shared across handlers
///
/// All publishing goes through `session`; handlers never touch capture or
/// peer resources directly.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Session controller front-end
    pub session: SessionHandle,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Name of the capture backend in use
    pub capture_backend: String,
    /// Name of the video encoder in use
    pub encoder: String,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        session: SessionHandle,
        events: Arc<EventBus>,
        capture_backend: impl Into<String>,
        encoder: impl Into<String>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session,
            events,
            capture_backend: capture_backend.into(),
            encoder: encoder.into(),
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
