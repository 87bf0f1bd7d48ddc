//! WebSocket handler for real-time event streaming
//!
//! Endpoint `/api/ws`:
//! - Broadcasts `SystemEvent`s to connected clients
//! - Topic-based filtering (`*`, `session.*`, exact event names)
//! - Greets with the current session state after the first subscribe
//! - Heartbeat ping every 30 seconds

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    /// Subscribe to event topics
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },

    /// Unsubscribe from event topics
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },

    /// Ping (keep-alive)
    #[serde(rename = "ping")]
    Ping,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection subscription state
#[derive(Debug, Default)]
struct Subscription {
    topics: Vec<String>,
    /// Session snapshot delivered after the first subscribe
    greeted: bool,
}

impl Subscription {
    fn apply(&mut self, text: &str) -> serde_json::Result<()> {
        match serde_json::from_str::<ClientMessage>(text)? {
            ClientMessage::Subscribe { topics } => {
                info!("Client subscribed to topics: {:?}", topics);
                self.topics = topics;
            }
            ClientMessage::Unsubscribe { topics } => {
                self.topics.retain(|t| !topics.contains(t));
                info!("Client unsubscribed from topics: {:?}", topics);
            }
            ClientMessage::Ping => debug!("Received ping from client"),
        }
        Ok(())
    }

    fn wants(&self, event: &SystemEvent) -> bool {
        should_send_event(event, &self.topics)
    }

    /// Snapshot to send once the client has picked its topics
    fn greeting(&mut self, state: &AppState) -> Option<SystemEvent> {
        if self.greeted || self.topics.is_empty() {
            return None;
        }
        self.greeted = true;
        let status = state.session.status();
        let snapshot = SystemEvent::SessionStateChanged {
            state: status.state,
            mode: status.mode,
        };
        self.wants(&snapshot).then_some(snapshot)
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut subscription = Subscription::default();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut shutdown = state.shutdown_signal();

    info!("WebSocket client connected");

    loop {
        let outgoing = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = subscription.apply(&text) {
                        warn!("Failed to handle client message: {}", e);
                    }
                    subscription
                        .greeting(&state)
                        .and_then(|event| serialize_event(&event).ok())
                        .map(Message::Text)
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                // Ping/pong frames are answered by axum
                Some(Ok(_)) => None,
            },

            event = event_rx.recv() => match event {
                Ok(event) if subscription.wants(&event) => {
                    serialize_event(&event).ok().map(Message::Text)
                }
                Ok(_) => None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged by {} events", n);
                    Some(Message::Text(lagged_notice(n)))
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Event bus closed");
                    break;
                }
            },

            _ = heartbeat.tick() => Some(Message::Ping(vec![])),

            _ = shutdown.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };

        if let Some(message) = outgoing {
            if sender.send(message).await.is_err() {
                warn!("Failed to write to client, disconnecting");
                break;
            }
        }
    }

    debug!("WebSocket handler exiting");
}

/// Check if an event should be sent based on subscribed topics
fn should_send_event(event: &SystemEvent, topics: &[String]) -> bool {
    !topics.is_empty() && topics.iter().any(|topic| event.matches_topic(topic))
}

fn serialize_event(event: &SystemEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn lagged_notice(missed: u64) -> String {
    serde_json::json!({
        "event": "session.lagged",
        "data": { "missed": missed },
    })
    .to_string()
}
