use std::collections::HashMap;

use dashmap::DashMap;

use super::Datastore;
use crate::utils::error::DatastoreError;

/// In-memory backend. Records live in a sharded map, so writers on
/// different keys rarely contend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Datastore for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, DatastoreError> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DatastoreError::not_found(key))
    }

    fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| DatastoreError::not_found(key))
    }

    fn dump(&self) -> Result<HashMap<String, Vec<u8>>, DatastoreError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn keys(&self) -> Result<Vec<String>, DatastoreError> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }
}
