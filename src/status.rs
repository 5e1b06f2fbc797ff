//! Cross-context status channel.
//!
//! Pipelines publish [`StatusEvent`]s here; the HTTP surface and any other
//! subscribers consume them. Live subscribers get a broadcast fan-out;
//! late joiners read an explicit single-slot cache holding only the most
//! recent event (last one wins — the status query contract).

use tokio::sync::{broadcast, RwLock};

use crate::models::{StatusEvent, StatusKind};

pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
    last: RwLock<Option<StatusEvent>>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            tx,
            last: RwLock::new(None),
        }
    }

    /// Publish an event: replaces the single-slot cache, then fans out to
    /// live subscribers (dropped silently when nobody listens).
    pub async fn publish(&self, kind: StatusKind, data: serde_json::Value) {
        let event = StatusEvent::new(kind, data);
        *self.last.write().await = Some(event.clone());
        let _ = self.tx.send(event);
    }

    /// The most recent event, if any was ever published.
    pub async fn last(&self) -> Option<StatusEvent> {
        self.last.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_starts_empty_and_tracks_latest() {
        let bus = StatusBus::new();
        assert!(bus.last().await.is_none());

        bus.publish(StatusKind::Status, serde_json::json!({ "step": "one" }))
            .await;
        bus.publish(StatusKind::Response, serde_json::json!({ "step": "two" }))
            .await;

        let last = bus.last().await.unwrap();
        assert_eq!(last.kind, StatusKind::Response);
        assert_eq!(last.data["step"], "two");
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = StatusBus::new();
        let mut rx = bus.subscribe();

        bus.publish(StatusKind::Error, serde_json::json!({ "message": "boom" }))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, StatusKind::Error);
        assert_eq!(event.data["message"], "boom");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = StatusBus::new();
        bus.publish(StatusKind::Status, serde_json::json!({})).await;
        assert!(bus.last().await.is_some());
    }

    #[test]
    fn event_serializes_with_uppercase_type_tag() {
        let event = StatusEvent::new(StatusKind::Response, serde_json::json!({ "ok": true }));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RESPONSE");
        assert_eq!(json["data"]["ok"], true);
        assert!(json["timestamp"].is_string());
    }
}
