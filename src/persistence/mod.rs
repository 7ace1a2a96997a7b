//! The `persistence` module provides the key/value store that keeps encoded
//! message records durable.
//!
//! The broker never reads the store on the delivery path; delivery decisions
//! are made by the in-memory state machine. The store is written after each
//! change so records can be restored on start-up and inspected.
//!
//! Every backend implements [`Datastore`] with identical error semantics:
//! `get` and `delete` on an absent key fail with
//! [`DatastoreError::NotFoundEntry`], everything else that goes wrong is a
//! [`DatastoreError::Backend`].
//!
//! Backends:
//! - [`MemoryStore`]: a sharded concurrent map, lost on exit.
//! - [`SqliteStore`]: one SQLite table with `key` as primary key.
//! - [`SledStore`]: a `sled` tree on local disk.

pub mod memory;
pub mod sled_store;
pub mod sqlite_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{DatastoreBackend, DatastoreSettings};
use crate::utils::error::DatastoreError;

pub use memory::MemoryStore;
pub use sled_store::SledStore;
pub use sqlite_store::SqliteStore;

/// Key/value contract shared by all backends. Values are opaque bytes.
pub trait Datastore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite the record at `key`.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError>;

    /// Bytes previously stored at `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, DatastoreError>;

    /// Remove the record at `key`. Absent keys are `NotFoundEntry`, so a
    /// second delete of the same key fails.
    fn delete(&self, key: &str) -> Result<(), DatastoreError>;

    /// Snapshot of every record.
    fn dump(&self) -> Result<HashMap<String, Vec<u8>>, DatastoreError>;

    /// Every current key, in no particular order.
    fn keys(&self) -> Result<Vec<String>, DatastoreError>;

    /// Push buffered writes to durable storage. Backends that write through
    /// on every call have nothing to do.
    fn flush(&self) -> Result<(), DatastoreError> {
        Ok(())
    }
}

/// Opens the backend selected by `settings`.
pub fn open_datastore(settings: &DatastoreSettings) -> Result<Arc<dyn Datastore>, DatastoreError> {
    let store: Arc<dyn Datastore> = match settings.backend {
        DatastoreBackend::Memory => Arc::new(MemoryStore::new()),
        DatastoreBackend::Sqlite => Arc::new(SqliteStore::open(
            &settings.path,
            Duration::from_millis(settings.busy_timeout_ms),
        )?),
        DatastoreBackend::Sled => Arc::new(SledStore::open(&settings.path)?),
    };
    info!(backend = ?settings.backend, path = %settings.path, "datastore opened");
    Ok(store)
}
