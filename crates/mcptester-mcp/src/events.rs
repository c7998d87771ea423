//! Session events.
//!
//! Every state change of a [`Session`](crate::Session) is published on its
//! [`EventBus`]. Receivers are independent; dropping one unsubscribes it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::history::HistoryItem;

/// Events buffered per receiver before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Status moved to a new value
    ConnectionStatusChanged { status: ConnectionStatus },

    /// Handshake completed
    Connected,

    /// Session torn down
    Disconnected,

    /// A connect, request or teardown failed
    Error { message: String },

    /// History changed; carries the full snapshot, newest first
    HistoryUpdated { history: Vec<HistoryItem> },

    /// Notification pushed by the server
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Broadcast channel owned by one session.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Succeeds even when nobody is listening.
    pub fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event emitted with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(SessionEvent::Connected);

        assert_eq!(first.recv().await.unwrap(), SessionEvent::Connected);
        assert_eq!(second.recv().await.unwrap(), SessionEvent::Connected);

        drop(second);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(SessionEvent::Disconnected);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let value = serde_json::to_value(SessionEvent::ConnectionStatusChanged {
            status: ConnectionStatus::Connecting,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "connectionStatusChanged", "status": "connecting"}));

        let value = serde_json::to_value(SessionEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }
}
