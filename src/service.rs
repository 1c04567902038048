//! Service façade tying the stack together: one entry point that takes a
//! DSL request envelope, dispatches it to the executor, and reports runtime
//! statistics. Embedders and transport layers sit on top of this.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Catalog;
use crate::document::Document;
use crate::errors::{DbError, Result};
use crate::query::{
    BulkOperation, BulkSummary, DeleteReport, QueryExecutor, UpdateReport, parse_query,
};
use crate::realtime::{Broadcaster, ConnectionHub, MessageSink, SubscriptionRegistry};
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryAction {
    Find,
    FindOne,
    Create,
    Update,
    Delete,
    Count,
    Bulk,
}

/// One DSL request envelope. `collection` is required for everything except
/// `bulk`, whose operations each name their own.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub action: QueryAction,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub operations: Option<Vec<BulkOperation>>,
}

/// Result shapes per action, serialized unwrapped.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Documents(Vec<Document>),
    Document(Option<Document>),
    Created(Document),
    Updated(UpdateReport),
    Deleted(DeleteReport),
    Count { count: u64 },
    Bulk(BulkSummary),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatistics {
    pub connections: usize,
    pub subscriptions: usize,
    pub subscriptions_by_collection: BTreeMap<String, usize>,
}

pub struct Backend {
    catalog: Arc<Catalog>,
    executor: QueryExecutor,
    registry: Arc<SubscriptionRegistry>,
    hub: Option<Arc<ConnectionHub>>,
}

impl Backend {
    /// Wires the executor over `store`, broadcasting changes through `sink`
    /// to subscribers registered in `registry`. The registry is shared with
    /// whatever manages the subscriptions (normally the hub).
    #[must_use]
    pub fn new(
        store: Arc<SqliteStore>,
        registry: Arc<SubscriptionRegistry>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let catalog = Arc::new(Catalog::new(Arc::clone(&store)));
        let broadcaster = Broadcaster::new(Arc::clone(&registry), sink);
        let executor = QueryExecutor::new(store, Arc::clone(&catalog), broadcaster);
        Self { catalog, executor, registry, hub: None }
    }

    /// Attaches the hub so connection counts show up in statistics.
    #[must_use]
    pub fn with_hub(mut self, hub: Arc<ConnectionHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Dispatches one request envelope.
    ///
    /// # Errors
    /// `InvalidRequest` for a missing collection or payload, plus whatever
    /// the parser and executor report.
    pub fn execute(&self, request: QueryRequest) -> Result<QueryResult> {
        match request.action {
            QueryAction::Find => {
                let collection = require_collection(&request.collection)?;
                let parsed = parse_query(request.query.as_ref())?;
                Ok(QueryResult::Documents(self.executor.find(collection, &parsed)?))
            }
            QueryAction::FindOne => {
                let collection = require_collection(&request.collection)?;
                let parsed = parse_query(request.query.as_ref())?;
                Ok(QueryResult::Document(self.executor.find_one(collection, &parsed)?))
            }
            QueryAction::Create => {
                let collection = require_collection(&request.collection)?;
                let data = request
                    .data
                    .ok_or_else(|| DbError::InvalidRequest("create requires data".into()))?;
                Ok(QueryResult::Created(self.executor.create(collection, data)?))
            }
            QueryAction::Update => {
                let collection = require_collection(&request.collection)?;
                let parsed = parse_query(request.query.as_ref())?;
                let patch = request
                    .data
                    .as_ref()
                    .ok_or_else(|| DbError::InvalidRequest("update requires data".into()))?;
                Ok(QueryResult::Updated(self.executor.update(collection, &parsed, patch)?))
            }
            QueryAction::Delete => {
                let collection = require_collection(&request.collection)?;
                let parsed = parse_query(request.query.as_ref())?;
                Ok(QueryResult::Deleted(self.executor.delete(collection, &parsed)?))
            }
            QueryAction::Count => {
                let collection = require_collection(&request.collection)?;
                let parsed = parse_query(request.query.as_ref())?;
                Ok(QueryResult::Count { count: self.executor.count(collection, &parsed)? })
            }
            QueryAction::Bulk => {
                Ok(QueryResult::Bulk(self.executor.bulk(request.operations.unwrap_or_default())))
            }
        }
    }

    /// Like [`execute`](Self::execute), from a raw JSON body. A body that
    /// does not deserialize into an envelope is the caller's fault, so it
    /// maps to `InvalidRequest` rather than a server-side JSON error.
    ///
    /// # Errors
    /// As [`execute`](Self::execute), plus `InvalidRequest` for malformed
    /// envelopes.
    pub fn execute_json(&self, body: &Value) -> Result<QueryResult> {
        let request: QueryRequest = serde_json::from_value(body.clone())
            .map_err(|e| DbError::InvalidRequest(format!("malformed request: {e}")))?;
        self.execute(request)
    }

    #[must_use]
    pub fn statistics(&self) -> BackendStatistics {
        BackendStatistics {
            connections: self.hub.as_ref().map_or(0, |hub| hub.connection_count()),
            subscriptions: self.registry.len(),
            subscriptions_by_collection: self.registry.counts_by_collection(),
        }
    }
}

fn require_collection(collection: &Option<String>) -> Result<&str> {
    collection
        .as_deref()
        .ok_or_else(|| DbError::InvalidRequest("collection is required".into()))
}
