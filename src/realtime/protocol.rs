//! Socket message shapes. Inbound frames carry an `action` tag; outbound
//! control frames carry a `type` tag, except the pong which answers on the
//! `action` key so clients can match it against their ping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        collection: String,
        #[serde(default, rename = "documentId")]
        document_id: Option<String>,
        #[serde(default)]
        query: Option<Value>,
    },
    Unsubscribe {
        collection: String,
        #[serde(default, rename = "documentId")]
        document_id: Option<String>,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Welcome {
        #[serde(rename = "connectionId")]
        connection_id: String,
        timestamp: DateTime<Utc>,
    },
    Subscribed {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        collection: String,
        #[serde(rename = "documentId")]
        document_id: Option<String>,
    },
    Unsubscribed,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PongReply {
    Pong,
}
