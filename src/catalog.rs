//! Collection registry backed by the `collections` table. Documents hang off
//! a collection id, so dropping a collection cascades to its documents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::Value;

use crate::document::new_id;
use crate::errors::{DbError, Result};
use crate::store::SqliteStore;

/// One row of the collection registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    pub id: String,
    pub name: String,
    pub schema: Option<Value>,
    pub indexes: Option<Value>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional descriptors attached at creation time. `schema` and `indexes`
/// are stored verbatim and not enforced against documents.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    pub schema: Option<Value>,
    pub indexes: Option<Value>,
    pub metadata: Option<Value>,
}

pub struct Catalog {
    store: Arc<SqliteStore>,
}

impl Catalog {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Registers a new collection under `name`.
    ///
    /// # Errors
    /// `CollectionAlreadyExists` when the name is taken, `InvalidRequest`
    /// for an empty name.
    pub fn create(&self, name: &str, options: CollectionOptions) -> Result<CollectionRecord> {
        if name.is_empty() {
            return Err(DbError::InvalidRequest("collection name is empty".into()));
        }
        let now = Utc::now();
        let record = CollectionRecord {
            id: new_id(),
            name: name.to_string(),
            schema: options.schema,
            indexes: options.indexes,
            metadata: options.metadata.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            created_at: now,
            updated_at: now,
        };
        let row = record.clone();
        self.store.write(move |conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
                [&row.name],
                |r| r.get(0),
            )?;
            if taken {
                return Err(DbError::CollectionAlreadyExists(row.name));
            }
            conn.execute(
                "INSERT INTO collections (id, name, schema, indexes, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.name,
                    row.schema.as_ref().map(Value::to_string),
                    row.indexes.as_ref().map(Value::to_string),
                    row.metadata.to_string(),
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        log::info!("collection '{name}' created ({})", record.id);
        Ok(record)
    }

    /// Looks a collection up by name.
    ///
    /// # Errors
    /// Only on storage failure; an unknown name is `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<CollectionRecord>> {
        let name = name.to_string();
        self.store.read(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, name, schema, indexes, metadata, created_at, updated_at
                     FROM collections WHERE name = ?1",
                    [&name],
                    read_record,
                )
                .optional()?;
            record.map(decode_record).transpose()
        })
    }

    /// Like [`get`](Self::get), but an unknown name is an error. Query
    /// execution resolves collections through here before touching documents.
    ///
    /// # Errors
    /// `NoSuchCollection` when the name is not registered.
    pub fn require(&self, name: &str) -> Result<CollectionRecord> {
        self.get(name)?.ok_or_else(|| DbError::NoSuchCollection(name.to_string()))
    }

    /// All collections, ordered by name.
    ///
    /// # Errors
    /// Only on storage failure.
    pub fn list(&self) -> Result<Vec<CollectionRecord>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, schema, indexes, metadata, created_at, updated_at
                 FROM collections ORDER BY name",
            )?;
            let rows = stmt.query_map([], read_record)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(decode_record(row?)?);
            }
            Ok(records)
        })
    }

    /// Drops a collection and, through the schema's cascade, every document
    /// in it. Returns false when the name was not registered.
    ///
    /// # Errors
    /// Only on storage failure.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let name_owned = name.to_string();
        let deleted = self.store.write(move |conn| {
            let count = conn.execute("DELETE FROM collections WHERE name = ?1", [&name_owned])?;
            Ok(count > 0)
        })?;
        if deleted {
            log::info!("collection '{name}' deleted");
        }
        Ok(deleted)
    }
}

/// Raw TEXT columns of one registry row, decoded off the rusqlite row before
/// JSON and timestamp parsing (which have their own error paths).
struct RawRecord {
    id: String,
    name: String,
    schema: Option<String>,
    indexes: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        schema: row.get(2)?,
        indexes: row.get(3)?,
        metadata: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn decode_record(raw: RawRecord) -> Result<CollectionRecord> {
    Ok(CollectionRecord {
        id: raw.id,
        name: raw.name,
        schema: raw.schema.as_deref().map(serde_json::from_str).transpose()?,
        indexes: raw.indexes.as_deref().map(serde_json::from_str).transpose()?,
        metadata: serde_json::from_str(&raw.metadata)?,
        created_at: parse_timestamp(&raw.created_at)?,
        updated_at: parse_timestamp(&raw.updated_at)?,
    })
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    text.parse::<DateTime<Utc>>()
        .map_err(|e| DbError::Storage(format!("bad stored timestamp '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use serde_json::json;

    fn catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SqliteStore::open(&dir.path().join("test.db"), &StoreOptions::default()).unwrap();
        (dir, Catalog::new(Arc::new(store)))
    }

    #[test]
    fn create_then_get_round_trips() {
        let (_dir, catalog) = catalog();
        let created = catalog
            .create(
                "products",
                CollectionOptions { metadata: Some(json!({"owner": "qa"})), ..Default::default() },
            )
            .unwrap();
        let fetched = catalog.get("products").unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.metadata, json!({"owner": "qa"}));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_dir, catalog) = catalog();
        catalog.create("products", CollectionOptions::default()).unwrap();
        let err = catalog.create("products", CollectionOptions::default()).unwrap_err();
        assert!(matches!(err, DbError::CollectionAlreadyExists(name) if name == "products"));
    }

    #[test]
    fn require_unknown_collection_fails() {
        let (_dir, catalog) = catalog();
        let err = catalog.require("ghost").unwrap_err();
        assert!(matches!(err, DbError::NoSuchCollection(name) if name == "ghost"));
    }

    #[test]
    fn list_orders_by_name() {
        let (_dir, catalog) = catalog();
        catalog.create("zebras", CollectionOptions::default()).unwrap();
        catalog.create("apples", CollectionOptions::default()).unwrap();
        let names: Vec<String> = catalog.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["apples", "zebras"]);
    }

    #[test]
    fn delete_reports_presence() {
        let (_dir, catalog) = catalog();
        catalog.create("products", CollectionOptions::default()).unwrap();
        assert!(catalog.delete("products").unwrap());
        assert!(!catalog.delete("products").unwrap());
        assert!(catalog.get("products").unwrap().is_none());
    }

    #[test]
    fn delete_cascades_to_documents() {
        let (_dir, catalog) = catalog();
        let record = catalog.create("products", CollectionOptions::default()).unwrap();
        let collection_id = record.id.clone();
        catalog
            .store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, collection_id, data, created_at, updated_at, version)
                     VALUES ('d1', ?1, '{}', ?2, ?2, 1)",
                    rusqlite::params![collection_id, "2026-01-01T00:00:00Z"],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(catalog.delete("products").unwrap());
        let remaining: i64 = catalog
            .store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
