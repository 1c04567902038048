use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// One change notification, fanned out to every matching subscriber. Create
/// and update events carry the post-change document; deletes carry `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub event: EventKind,
    pub collection: String,
    pub document_id: String,
    pub document: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeEvent {
    #[must_use]
    pub fn created(collection: &str, document: &Document) -> Self {
        Self::with_document(EventKind::Create, collection, document)
    }

    #[must_use]
    pub fn updated(collection: &str, document: &Document) -> Self {
        Self::with_document(EventKind::Update, collection, document)
    }

    #[must_use]
    pub fn deleted(collection: &str, document_id: &str) -> Self {
        Self {
            event: EventKind::Delete,
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            document: None,
            timestamp: Utc::now(),
        }
    }

    fn with_document(event: EventKind, collection: &str, document: &Document) -> Self {
        Self {
            event,
            collection: collection.to_string(),
            document_id: document.id.clone(),
            // to_value of a plain struct cannot fail
            document: serde_json::to_value(document).ok(),
            timestamp: Utc::now(),
        }
    }
}
