//! Subscription bookkeeping. Entries are bucketed under a key of either the
//! bare collection name or `collection:documentId`, so delivering an event
//! means taking the union of exactly two buckets.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::document::new_id;

/// One registered interest of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub connection_id: String,
    pub collection: String,
    pub document_id: Option<String>,
    /// Optional filter echoed back to the client; not evaluated server-side.
    pub query: Option<Value>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    buckets: RwLock<HashMap<String, Vec<Subscription>>>,
}

fn bucket_key(collection: &str, document_id: Option<&str>) -> String {
    match document_id {
        Some(id) => format!("{collection}:{id}"),
        None => collection.to_string(),
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interest. Re-subscribing to a target the connection
    /// already holds returns the existing entry instead of a duplicate.
    pub fn add(
        &self,
        connection_id: &str,
        collection: &str,
        document_id: Option<&str>,
        query: Option<Value>,
        user_id: Option<&str>,
    ) -> Subscription {
        let key = bucket_key(collection, document_id);
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key).or_default();
        if let Some(existing) = bucket.iter().find(|s| s.connection_id == connection_id) {
            return existing.clone();
        }
        let subscription = Subscription {
            id: new_id(),
            connection_id: connection_id.to_string(),
            collection: collection.to_string(),
            document_id: document_id.map(str::to_string),
            query,
            user_id: user_id.map(str::to_string),
            created_at: Utc::now(),
        };
        bucket.push(subscription.clone());
        subscription
    }

    /// Drops one connection's interest in a target. Returns how many entries
    /// were removed (0 or 1).
    pub fn remove(&self, connection_id: &str, collection: &str, document_id: Option<&str>) -> usize {
        let key = bucket_key(collection, document_id);
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&key) else { return 0 };
        let before = bucket.len();
        bucket.retain(|s| s.connection_id != connection_id);
        let removed = before - bucket.len();
        if bucket.is_empty() {
            buckets.remove(&key);
        }
        removed
    }

    /// Drops every interest held by a connection, across all buckets. Part
    /// of connection teardown; returns how many entries were removed.
    pub fn remove_all(&self, connection_id: &str) -> usize {
        let mut buckets = self.buckets.write();
        let mut removed = 0;
        buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|s| s.connection_id != connection_id);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    /// Everyone who should see a change to `document_id` in `collection`:
    /// the collection-level bucket plus the document-level bucket.
    #[must_use]
    pub fn matching(&self, collection: &str, document_id: &str) -> Vec<Subscription> {
        let buckets = self.buckets.read();
        let mut matches = Vec::new();
        if let Some(bucket) = buckets.get(collection) {
            matches.extend(bucket.iter().cloned());
        }
        if let Some(bucket) = buckets.get(&bucket_key(collection, Some(document_id))) {
            matches.extend(bucket.iter().cloned());
        }
        matches
    }

    /// Live subscription counts keyed by collection name, with document-level
    /// entries folded into their collection.
    #[must_use]
    pub fn counts_by_collection(&self) -> BTreeMap<String, usize> {
        let buckets = self.buckets.read();
        let mut counts = BTreeMap::new();
        for subscription in buckets.values().flatten() {
            *counts.entry(subscription.collection.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.read().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
