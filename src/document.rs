use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One JSON record scoped to a collection.
///
/// `version` starts at 1 and increments on every successful update; `data`
/// is opaque apart from the reserved `_id` field written at create time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Document {
    /// Builds a fresh document, generating its id and stamping it into the
    /// payload as `_id`.
    #[must_use]
    pub fn new(collection_id: &str, mut data: Map<String, Value>) -> Self {
        let id = new_id();
        data.insert("_id".to_string(), Value::String(id.clone()));
        let now = Utc::now();
        Self {
            id,
            collection_id: collection_id.to_string(),
            data: Value::Object(data),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
