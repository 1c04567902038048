use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;

use crate::errors::{DbError, Result};

/// Bumped on breaking schema changes. There is no migration support; an
/// unexpected version is a startup failure.
const SCHEMA_VERSION: i32 = 1;

const CREATE_COLLECTIONS: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    schema      TEXT,
    indexes     TEXT,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
)";

const CREATE_DOCUMENTS: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    id            TEXT NOT NULL,
    data          TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    version       INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (collection_id, id)
)";

/// Creates the tables on a fresh database and verifies the schema version on
/// an existing one.
///
/// # Errors
/// `Storage` when the on-disk schema version does not match.
pub(crate) fn initialize(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        conn.execute_batch(CREATE_COLLECTIONS)?;
        conn.execute_batch(CREATE_DOCUMENTS)?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    } else if version != SCHEMA_VERSION {
        return Err(DbError::Storage(format!(
            "unsupported schema version {version}, expected {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

/// WAL allows the read pool to run concurrently with the writer thread.
pub(crate) fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    conn.execute_batch("PRAGMA synchronous = NORMAL")?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.execute_batch("PRAGMA busy_timeout = 5000")?;
    Ok(())
}

/// Registers `regexp(pattern, text)` so `$regex` predicates can use the
/// `REGEXP` operator. The compiled pattern is cached via SQLite's aux-data
/// mechanism, so repeated rows reuse one compilation per statement.
pub(crate) fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern = ctx.get_or_create_aux(
                0,
                |vr| -> std::result::Result<Regex, Box<dyn std::error::Error + Send + Sync>> {
                    Ok(Regex::new(vr.as_str()?)?)
                },
            )?;
            // non-text values (including missing fields) never match
            let matched = match ctx.get_raw(1) {
                ValueRef::Text(bytes) => {
                    std::str::from_utf8(bytes).is_ok_and(|text| pattern.is_match(text))
                }
                _ => false,
            };
            Ok(matched)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_regexp(&conn).unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn initialize_is_idempotent() {
        let conn = memory_conn();
        initialize(&conn).unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn regexp_function_matches_text_only() {
        let conn = memory_conn();
        let hit: bool = conn
            .query_row("SELECT 'hello' REGEXP '^he'", [], |row| row.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT 42 REGEXP '^he'", [], |row| row.get(0))
            .unwrap();
        assert!(!miss);
    }
}
