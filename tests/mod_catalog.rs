use std::sync::Arc;

use fluxbase::errors::DbError;
use fluxbase::realtime::{MessageSink, SendError, SubscriptionRegistry};
use fluxbase::service::Backend;
use fluxbase::store::{SqliteStore, StoreOptions};
use fluxbase::{CollectionOptions, parse_query};
use serde_json::json;

struct NoopSink;

impl MessageSink for NoopSink {
    fn send(&self, _connection_id: &str, _message: &str) -> Result<(), SendError> {
        Ok(())
    }
}

fn backend() -> (tempfile::TempDir, Backend) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::open(&dir.path().join("catalog.db"), &StoreOptions::default()).unwrap(),
    );
    let registry = Arc::new(SubscriptionRegistry::new());
    let backend = Backend::new(store, registry, Arc::new(NoopSink));
    (dir, backend)
}

#[test]
fn create_get_list_delete_lifecycle() {
    let (_dir, backend) = backend();
    let catalog = backend.catalog();
    let created = catalog
        .create(
            "products",
            CollectionOptions { schema: Some(json!({"type": "object"})), ..Default::default() },
        )
        .unwrap();
    assert_eq!(created.name, "products");
    assert_eq!(created.schema, Some(json!({"type": "object"})));

    let fetched = catalog.get("products").unwrap().unwrap();
    assert_eq!(fetched.id, created.id);

    catalog.create("orders", CollectionOptions::default()).unwrap();
    let names: Vec<String> = catalog.list().unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["orders", "products"]);

    assert!(catalog.delete("products").unwrap());
    assert!(!catalog.delete("products").unwrap());
    assert!(catalog.get("products").unwrap().is_none());
}

#[test]
fn duplicate_name_is_rejected() {
    let (_dir, backend) = backend();
    backend.catalog().create("products", CollectionOptions::default()).unwrap();
    let err = backend.catalog().create("products", CollectionOptions::default()).unwrap_err();
    assert!(matches!(err, DbError::CollectionAlreadyExists(name) if name == "products"));
}

#[test]
fn require_names_the_missing_collection() {
    let (_dir, backend) = backend();
    let err = backend.catalog().require("ghosts").unwrap_err();
    assert!(err.is_client_error());
    assert!(matches!(err, DbError::NoSuchCollection(name) if name == "ghosts"));
}

#[test]
fn recreating_a_deleted_collection_starts_empty() {
    let (_dir, backend) = backend();
    backend.catalog().create("products", CollectionOptions::default()).unwrap();
    backend.executor().create("products", json!({"name": "widget"})).unwrap();
    backend.executor().create("products", json!({"name": "gadget"})).unwrap();

    assert!(backend.catalog().delete("products").unwrap());

    // A fresh collection under the same name starts empty.
    backend.catalog().create("products", CollectionOptions::default()).unwrap();
    let empty = parse_query(None).unwrap();
    assert_eq!(backend.executor().count("products", &empty).unwrap(), 0);
    assert!(backend.executor().find("products", &empty).unwrap().is_empty());
}

#[test]
fn empty_collection_name_is_a_client_error() {
    let (_dir, backend) = backend();
    let err = backend.catalog().create("", CollectionOptions::default()).unwrap_err();
    assert!(matches!(err, DbError::InvalidRequest(_)));
}
