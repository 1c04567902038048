use std::sync::Arc;

use thiserror::Error;

use super::events::RealtimeEvent;
use super::registry::SubscriptionRegistry;

/// Delivery failures are per-recipient and never abort a fan-out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("unknown connection")]
    UnknownConnection,
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Where broadcast frames go. The connection hub is the production
/// implementation; tests substitute recording or failing sinks.
pub trait MessageSink: Send + Sync {
    fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError>;
}

/// Fans one event out to every matching subscriber. The wire form is
/// serialized once per event, not once per recipient, and delivery is best
/// effort: a failed recipient is logged and skipped.
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
    sink: Arc<dyn MessageSink>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, sink: Arc<dyn MessageSink>) -> Self {
        Self { registry, sink }
    }

    /// Returns how many recipients were actually delivered to.
    pub fn broadcast(&self, event: &RealtimeEvent) -> usize {
        let matches = self.registry.matching(&event.collection, &event.document_id);
        if matches.is_empty() {
            log::debug!("no subscribers for {}/{}", event.collection, event.document_id);
            return 0;
        }
        let wire = match serde_json::to_string(event) {
            Ok(wire) => wire,
            Err(e) => {
                log::error!("event serialization failed for {}: {e}", event.collection);
                return 0;
            }
        };
        let mut delivered = 0;
        for subscription in &matches {
            match self.sink.send(&subscription.connection_id, &wire) {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!(
                    "dropping event for connection {}: {e}",
                    subscription.connection_id
                ),
            }
        }
        log::debug!(
            "{:?} on {}/{} delivered to {delivered}/{} subscribers",
            event.event,
            event.collection,
            event.document_id,
            matches.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: Option<String>,
    }

    impl MessageSink for RecordingSink {
        fn send(&self, connection_id: &str, message: &str) -> Result<(), SendError> {
            if self.fail_for.as_deref() == Some(connection_id) {
                return Err(SendError::QueueFull);
            }
            self.sent.lock().push((connection_id.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn sample_doc() -> Document {
        let Value::Object(obj) = json!({"name": "widget"}) else { unreachable!() };
        Document::new("col-1", obj)
    }

    #[test]
    fn one_failed_recipient_does_not_stop_the_rest() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.add("conn-a", "products", None, None, None);
        registry.add("conn-b", "products", None, None, None);
        registry.add("conn-c", "products", None, None, None);
        let sink = Arc::new(RecordingSink {
            fail_for: Some("conn-b".to_string()),
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(registry, Arc::clone(&sink) as Arc<dyn MessageSink>);

        let doc = sample_doc();
        let delivered = broadcaster.broadcast(&RealtimeEvent::created("products", &doc));
        assert_eq!(delivered, 2);
        let ids: Vec<String> = sink.sent.lock().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec!["conn-a", "conn-c"]);
    }

    #[test]
    fn every_recipient_gets_the_same_serialized_frame() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry.add("conn-a", "products", None, None, None);
        registry.add("conn-b", "products", None, None, None);
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(registry, Arc::clone(&sink) as Arc<dyn MessageSink>);

        let doc = sample_doc();
        broadcaster.broadcast(&RealtimeEvent::updated("products", &doc));
        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, sent[1].1);
        let frame: Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(frame["event"], json!("update"));
    }

    #[test]
    fn no_subscribers_is_a_quiet_no_op() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(registry, Arc::clone(&sink) as Arc<dyn MessageSink>);
        assert_eq!(broadcaster.broadcast(&RealtimeEvent::deleted("products", "doc-1")), 0);
        assert!(sink.sent.lock().is_empty());
    }
}
