//! The `error` module defines the error types shared across `pubstate`.
//!
//! Two layers exist. [`DatastoreError`] is what every persistence backend
//! returns, and it keeps "not found" as its own variant so callers can
//! branch on absence without matching on strings. [`BrokerError`] is what
//! the broker surface returns; storage failures are carried inside it.
//!
//! Refused state transitions (delivering twice, acking before delivery) are
//! not errors and never show up here.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DatastoreError {
    /// The key has no record in the store.
    #[error("not found entry: {key}")]
    NotFoundEntry { key: String },

    /// Any other backend failure, tagged with the operation and key.
    #[error("datastore {op} failed (key: {key}): {source}")]
    Backend {
        op: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },
}

impl DatastoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFoundEntry { key: key.into() }
    }

    pub fn backend<E>(op: &'static str, key: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend {
            op,
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundEntry { .. })
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not found topic: {0}")]
    NotFoundTopic(String),

    #[error("not found subscription: {0}")]
    NotFoundSubscription(String),

    #[error("already exist topic: {0}")]
    AlreadyExistTopic(String),

    #[error("already exist subscription: {0}")]
    AlreadyExistSubscription(String),

    #[error("not found message: {0}")]
    NotFoundMessage(String),

    /// Stored bytes did not decode into a message record.
    #[error("not match type message: {0}")]
    NotMatchTypeMessage(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
