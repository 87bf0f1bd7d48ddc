//! Host-facing notifications
//!
//! Session, peer and capture events share one bus; the WebSocket endpoint
//! forwards them to subscribed clients.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::AppError;

/// Events buffered per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`SystemEvent`]s
///
/// Publishing never blocks and never fails; a subscriber that falls more
/// than [`EVENT_CHANNEL_CAPACITY`] events behind sees `Lagged` and skips
/// ahead.
///
/// ```no_run
/// use live_publisher::events::{EventBus, SystemEvent};
/// use live_publisher::session::{SessionState, SourceMode};
///
/// # async fn demo() {
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::SessionStateChanged {
///     state: SessionState::Live,
///     mode: Some(SourceMode::Camera),
/// });
///
/// if let Ok(event) = rx.recv().await {
///     assert_eq!(event.event_name(), "session.state_changed");
/// }
/// # }
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Deliver to current subscribers; dropped when there are none
    pub fn publish(&self, event: SystemEvent) {
        trace!(event = event.event_name(), "publish");
        let _ = self.tx.send(event);
    }

    /// Surface an error to the host as code + message
    pub fn publish_error(&self, err: &AppError, terminal: bool) {
        warn!(code = %err.code(), terminal, "{}", err);
        self.publish(SystemEvent::SessionError {
            code: err.code(),
            message: err.to_string(),
            terminal,
        });
    }

    /// Receiver for events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
