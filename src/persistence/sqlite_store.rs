//! Relational backend on SQLite.
//!
//! Schema: `datastore (key TEXT PRIMARY KEY, value BLOB NOT NULL)`.
//!
//! Each operation is a single statement. `set` is an upsert and `delete`
//! detects a missing key from the affected row count, so neither needs a
//! separate existence query. The connection mutex is held for one
//! statement only.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::Datastore;
use crate::utils::error::DatastoreError;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS datastore (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
)";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file at `path`. The special path
    /// `:memory:` opens a private in-memory database.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self, DatastoreError> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatastoreError::backend("open", path, e))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| DatastoreError::backend("open", path, e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| DatastoreError::backend("open", path, e))?;
        // journal_mode returns a row, so it goes through pragma_update_and_check
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(|e| DatastoreError::backend("open", path, e))?;

        Self::with_connection(conn, path)
    }

    pub fn open_in_memory() -> Result<Self, DatastoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatastoreError::backend("open", ":memory:", e))?;
        Self::with_connection(conn, ":memory:")
    }

    fn with_connection(conn: Connection, path: &str) -> Result<Self, DatastoreError> {
        conn.execute(CREATE_TABLE, [])
            .map_err(|e| DatastoreError::backend("create table", path, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Datastore for SqliteStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO datastore (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| DatastoreError::backend("set", key, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, DatastoreError> {
        self.conn
            .lock()
            .query_row(
                "SELECT value FROM datastore WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| DatastoreError::backend("get", key, e))?
            .ok_or_else(|| DatastoreError::not_found(key))
    }

    fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM datastore WHERE key = ?1", params![key])
            .map_err(|e| DatastoreError::backend("delete", key, e))?;
        if affected == 0 {
            return Err(DatastoreError::not_found(key));
        }
        Ok(())
    }

    fn dump(&self) -> Result<HashMap<String, Vec<u8>>, DatastoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key, value FROM datastore")
            .map_err(|e| DatastoreError::backend("dump", "*", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| DatastoreError::backend("dump", "*", e))?;
        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| DatastoreError::backend("dump", "*", e))
    }

    fn keys(&self) -> Result<Vec<String>, DatastoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key FROM datastore")
            .map_err(|e| DatastoreError::backend("keys", "*", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DatastoreError::backend("keys", "*", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatastoreError::backend("keys", "*", e))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("conn", &"rusqlite::Connection")
            .finish()
    }
}
