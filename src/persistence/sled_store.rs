//! Embedded backend on `sled`.
//!
//! Records live in a single tree named `datastore` inside the sled database
//! at the configured path. Keys are stored as their UTF-8 bytes.

use std::collections::HashMap;

use sled::{Db, Tree};

use super::Datastore;
use crate::utils::error::DatastoreError;

const TREE_NAME: &str = "datastore";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, DatastoreError> {
        let db = sled::open(path).map_err(|e| DatastoreError::backend("open", path, e))?;
        let tree = db
            .open_tree(TREE_NAME)
            .map_err(|e| DatastoreError::backend("open", path, e))?;
        Ok(Self { db, tree })
    }
}

fn decode_key(raw: &[u8]) -> Result<String, DatastoreError> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| DatastoreError::backend("decode key", String::from_utf8_lossy(raw), e))
}

impl Datastore for SledStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError> {
        self.tree
            .insert(key.as_bytes(), value)
            .map_err(|e| DatastoreError::backend("set", key, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, DatastoreError> {
        self.tree
            .get(key.as_bytes())
            .map_err(|e| DatastoreError::backend("get", key, e))?
            .map(|value| value.to_vec())
            .ok_or_else(|| DatastoreError::not_found(key))
    }

    fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.tree
            .remove(key.as_bytes())
            .map_err(|e| DatastoreError::backend("delete", key, e))?
            .map(|_| ())
            .ok_or_else(|| DatastoreError::not_found(key))
    }

    fn dump(&self) -> Result<HashMap<String, Vec<u8>>, DatastoreError> {
        self.tree
            .iter()
            .map(|entry| {
                let (key, value) = entry.map_err(|e| DatastoreError::backend("dump", "*", e))?;
                Ok((decode_key(&key)?, value.to_vec()))
            })
            .collect()
    }

    fn keys(&self) -> Result<Vec<String>, DatastoreError> {
        self.tree
            .iter()
            .keys()
            .map(|key| {
                let key = key.map_err(|e| DatastoreError::backend("keys", "*", e))?;
                decode_key(&key)
            })
            .collect()
    }

    fn flush(&self) -> Result<(), DatastoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| DatastoreError::backend("flush", "*", e))
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("tree", &TREE_NAME)
            .finish()
    }
}
