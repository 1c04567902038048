//! Query execution over the document store. Every action resolves its
//! collection through the catalog first, builds SQL from rendered predicates
//! with all operands bound, and hands mutation events to the broadcaster
//! after the write lands.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Row, params_from_iter};
use serde_json::{Map, Value};

use super::parse::{parse_patch, parse_query};
use super::sql::{self, SqlParam};
use super::types::{
    BulkAction, BulkOpResult, BulkOperation, BulkSummary, DeleteReport, MAX_LIMIT, ParsedQuery,
    UpdateReport,
};
use crate::catalog::{Catalog, parse_timestamp};
use crate::document::Document;
use crate::errors::{DbError, Result};
use crate::realtime::{Broadcaster, RealtimeEvent};
use crate::store::SqliteStore;

const DOCUMENT_COLUMNS: &str = "id, collection_id, data, created_at, updated_at, version";

pub struct QueryExecutor {
    store: Arc<SqliteStore>,
    catalog: Arc<Catalog>,
    broadcaster: Broadcaster,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, catalog: Arc<Catalog>, broadcaster: Broadcaster) -> Self {
        Self { store, catalog, broadcaster }
    }

    /// Runs a filtered, ordered, paginated read. The limit is clamped to
    /// [`MAX_LIMIT`] whether or not the caller asked for one. With
    /// `distinct`, documents whose (projected) payload repeats an earlier
    /// one are dropped.
    ///
    /// # Errors
    /// `NoSuchCollection`, or storage/decode failures.
    pub fn find(&self, collection: &str, query: &ParsedQuery) -> Result<Vec<Document>> {
        let col = self.catalog.require(collection)?;
        let mut where_params = Vec::new();
        let predicates = sql::render_predicates(&query.conditions, &mut where_params)?;

        let mut stmt = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection_id = ?");
        for predicate in &predicates {
            stmt.push_str(" AND ");
            stmt.push_str(predicate);
        }
        stmt.push_str(&sql::render_order_by(&query.order_by));
        let limit = query.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT);
        stmt.push_str(&sql::render_limit(limit, query.offset.unwrap_or(0)));

        let mut params = vec![SqlParam::Text(col.id)];
        params.extend(where_params);
        let mut documents = self.store.read(move |conn| fetch_documents(conn, &stmt, &params))?;

        if let Some(fields) = &query.select {
            documents = documents.into_iter().map(|doc| project(doc, fields)).collect();
        }
        if query.distinct {
            let mut seen = HashSet::new();
            documents.retain(|doc| seen.insert(distinct_key(&doc.data)));
        }
        Ok(documents)
    }

    /// `find` with the limit forced to one.
    ///
    /// # Errors
    /// Same as [`find`](Self::find).
    pub fn find_one(&self, collection: &str, query: &ParsedQuery) -> Result<Option<Document>> {
        let narrowed = ParsedQuery { limit: Some(1), ..query.clone() };
        Ok(self.find(collection, &narrowed)?.into_iter().next())
    }

    /// Inserts one document and emits a `create` event carrying it.
    ///
    /// # Errors
    /// `NoSuchCollection`, `InvalidRequest` for non-object data, or storage
    /// failures.
    pub fn create(&self, collection: &str, data: Value) -> Result<Document> {
        let col = self.catalog.require(collection)?;
        let Value::Object(fields) = data else {
            return Err(DbError::InvalidRequest("create data must be an object".into()));
        };
        let document = Document::new(&col.id, fields);
        let row = document.clone();
        self.store.write(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                rusqlite::params![
                    row.id,
                    row.collection_id,
                    row.data.to_string(),
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                    row.version,
                ],
            )?;
            Ok(())
        })?;
        log::debug!("created document {} in '{collection}'", document.id);
        self.broadcaster.broadcast(&RealtimeEvent::created(collection, &document));
        Ok(document)
    }

    /// Applies a `$set`-style patch to every matching document in one atomic
    /// statement: one `json_set` term per patch field, `version` bumped,
    /// `updated_at` refreshed. Emits an `update` event per touched document
    /// with its post-update state.
    ///
    /// # Errors
    /// `NoSuchCollection`, patch validation errors, or storage failures.
    pub fn update(
        &self,
        collection: &str,
        query: &ParsedQuery,
        patch: &Value,
    ) -> Result<UpdateReport> {
        let col = self.catalog.require(collection)?;
        let pairs = parse_patch(patch)?;
        let mut where_params = Vec::new();
        let predicates = sql::render_predicates(&query.conditions, &mut where_params)?;

        let mut stmt = String::from("UPDATE documents SET data = json_set(data");
        let mut params = Vec::with_capacity(pairs.len() + 2 + where_params.len());
        for (field, value) in &pairs {
            // field names passed patch validation; operands still bind
            stmt.push_str(&format!(", '$.{field}', json(?)"));
            params.push(SqlParam::Text(value.to_string()));
        }
        stmt.push_str("), version = version + 1, updated_at = ? WHERE collection_id = ?");
        params.push(SqlParam::Text(Utc::now().to_rfc3339()));
        params.push(SqlParam::Text(col.id));
        for predicate in &predicates {
            stmt.push_str(" AND ");
            stmt.push_str(predicate);
        }
        params.extend(where_params);
        stmt.push_str(&format!(" RETURNING {DOCUMENT_COLUMNS}"));

        let updated = self.store.write(move |conn| fetch_documents(conn, &stmt, &params))?;
        log::debug!("updated {} documents in '{collection}'", updated.len());
        for document in &updated {
            self.broadcaster.broadcast(&RealtimeEvent::updated(collection, document));
        }
        let count = updated.len() as u64;
        Ok(UpdateReport { matched: count, modified: count })
    }

    /// Deletes every matching document in one atomic statement and emits a
    /// `delete` event per removed id.
    ///
    /// # Errors
    /// `NoSuchCollection`, or storage failures.
    pub fn delete(&self, collection: &str, query: &ParsedQuery) -> Result<DeleteReport> {
        let col = self.catalog.require(collection)?;
        let mut where_params = Vec::new();
        let predicates = sql::render_predicates(&query.conditions, &mut where_params)?;

        let mut stmt = String::from("DELETE FROM documents WHERE collection_id = ?");
        let mut params = vec![SqlParam::Text(col.id)];
        for predicate in &predicates {
            stmt.push_str(" AND ");
            stmt.push_str(predicate);
        }
        params.extend(where_params);
        stmt.push_str(" RETURNING id");

        let ids = self.store.write(move |conn| {
            let mut prepared = conn.prepare(&stmt)?;
            let rows =
                prepared.query_map(params_from_iter(&params), |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for id in rows {
                ids.push(id?);
            }
            Ok(ids)
        })?;
        log::debug!("deleted {} documents from '{collection}'", ids.len());
        for id in &ids {
            self.broadcaster.broadcast(&RealtimeEvent::deleted(collection, id));
        }
        Ok(DeleteReport { deleted: ids.len() as u64 })
    }

    /// Counts matching documents without decoding them.
    ///
    /// # Errors
    /// `NoSuchCollection`, or storage failures.
    pub fn count(&self, collection: &str, query: &ParsedQuery) -> Result<u64> {
        let col = self.catalog.require(collection)?;
        let mut where_params = Vec::new();
        let predicates = sql::render_predicates(&query.conditions, &mut where_params)?;

        let mut stmt = String::from("SELECT COUNT(*) FROM documents WHERE collection_id = ?");
        let mut params = vec![SqlParam::Text(col.id)];
        for predicate in &predicates {
            stmt.push_str(" AND ");
            stmt.push_str(predicate);
        }
        params.extend(where_params);

        let count: i64 = self.store.read(move |conn| {
            Ok(conn.query_row(&stmt, params_from_iter(&params), |row| row.get(0))?)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Runs a batch sequentially. Each operation is its own independent
    /// write: a failed slot records its error and the batch moves on, so a
    /// partially-applied batch is a normal outcome, not a rollback.
    pub fn bulk(&self, operations: Vec<BulkOperation>) -> BulkSummary {
        let mut summary = BulkSummary { total: operations.len(), ..BulkSummary::default() };
        for (index, operation) in operations.into_iter().enumerate() {
            match self.run_bulk_operation(&operation) {
                Ok(result) => {
                    summary.succeeded += 1;
                    summary.results.push(BulkOpResult {
                        index,
                        success: true,
                        result: Some(result),
                        error: None,
                    });
                }
                Err(e) => {
                    log::warn!("bulk operation {index} on '{}' failed: {e}", operation.collection);
                    summary.failed += 1;
                    summary.results.push(BulkOpResult {
                        index,
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        summary
    }

    fn run_bulk_operation(&self, operation: &BulkOperation) -> Result<Value> {
        match operation.action {
            BulkAction::Create => {
                let data = operation
                    .data
                    .clone()
                    .ok_or_else(|| DbError::InvalidRequest("bulk create requires data".into()))?;
                let document = self.create(&operation.collection, data)?;
                Ok(serde_json::to_value(document)?)
            }
            BulkAction::Update => {
                let patch = operation
                    .data
                    .as_ref()
                    .ok_or_else(|| DbError::InvalidRequest("bulk update requires data".into()))?;
                let parsed = parse_query(operation.query.as_ref())?;
                let report = self.update(&operation.collection, &parsed, patch)?;
                Ok(serde_json::to_value(report)?)
            }
            BulkAction::Delete => {
                let parsed = parse_query(operation.query.as_ref())?;
                let report = self.delete(&operation.collection, &parsed)?;
                Ok(serde_json::to_value(report)?)
            }
        }
    }
}

fn fetch_documents(conn: &Connection, stmt: &str, params: &[SqlParam]) -> Result<Vec<Document>> {
    let mut prepared = conn.prepare(stmt)?;
    let rows = prepared.query_map(params_from_iter(params), read_row)?;
    let mut documents = Vec::new();
    for row in rows {
        documents.push(decode_row(row?)?);
    }
    Ok(documents)
}

struct RawRow {
    id: String,
    collection_id: String,
    data: String,
    created_at: String,
    updated_at: String,
    version: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        collection_id: row.get(1)?,
        data: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        version: row.get(5)?,
    })
}

fn decode_row(raw: RawRow) -> Result<Document> {
    Ok(Document {
        id: raw.id,
        collection_id: raw.collection_id,
        data: serde_json::from_str(&raw.data)?,
        created_at: parse_timestamp(&raw.created_at)?,
        updated_at: parse_timestamp(&raw.updated_at)?,
        version: raw.version,
    })
}

/// Inclusion projection: keeps `_id` plus each selected path that exists.
fn project(mut document: Document, fields: &[String]) -> Document {
    let mut out = Map::new();
    if let Some(id) = document.data.get("_id") {
        out.insert("_id".to_string(), id.clone());
    }
    for path in fields {
        if let Some(value) = lookup_path(&document.data, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    document.data = Value::Object(out);
    document
}

/// Duplicate detection compares payloads with the generated `_id` stripped;
/// otherwise no two documents could ever collide.
fn distinct_key(data: &Value) -> String {
    match data {
        Value::Object(fields) => {
            let mut trimmed = fields.clone();
            trimmed.remove("_id");
            Value::Object(trimmed).to_string()
        }
        other => other.to_string(),
    }
}

fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |acc, segment| acc.as_object()?.get(segment))
}

fn insert_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = out.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with(data: Value) -> Document {
        let Value::Object(fields) = data else { unreachable!() };
        Document::new("col-1", fields)
    }

    #[test]
    fn projection_keeps_id_and_selected_paths() {
        let doc =
            doc_with(json!({"name": "widget", "price": 5, "meta": {"color": "red", "size": 3}}));
        let projected = project(doc, &["name".to_string(), "meta.color".to_string()]);
        let data = projected.data.as_object().unwrap();
        assert!(data.contains_key("_id"));
        assert_eq!(data["name"], json!("widget"));
        assert_eq!(data["meta"], json!({"color": "red"}));
        assert!(!data.contains_key("price"));
    }

    #[test]
    fn projection_skips_missing_paths() {
        let doc = doc_with(json!({"a": 1}));
        let projected = project(doc, &["b".to_string(), "a.b".to_string()]);
        let data = projected.data.as_object().unwrap();
        assert_eq!(data.len(), 1, "only _id survives: {data:?}");
    }
}
