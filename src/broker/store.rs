//! Message store
//!
//! `MessageStore` keeps the live `Arc<Message>` index used for delivery and
//! writes every change through to a [`Datastore`] so records survive a
//! restart. It is owned by the broker; there is no process-wide instance.
//!
//! The index lock only guards the map of ids. It is never held while a
//! message's own state lock is taken or while the datastore is called.
//!
//! Writes of one message's record happen under that message's write guard,
//! taken before the index lock. Snapshots therefore land in the datastore in
//! the order they were taken, and a removed message is never written back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::broker::message::{Message, MessageId};
use crate::broker::topic::SubscriptionId;
use crate::persistence::Datastore;
use crate::utils::error::Result;

#[derive(Debug)]
pub struct MessageStore {
    messages: RwLock<HashMap<MessageId, Arc<Message>>>,
    datastore: Arc<dyn Datastore>,
}

impl MessageStore {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            datastore,
        }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Persist a new message and add it to the index.
    pub fn insert(&self, message: Arc<Message>) -> Result<()> {
        let _guard = message.write_guard();
        self.write(&message)?;
        self.messages.write().insert(message.id.clone(), message.clone());
        Ok(())
    }

    /// Write the current form of `message` to the datastore. A message that
    /// has already been removed from the index is not written back.
    pub fn persist(&self, message: &Message) -> Result<()> {
        let _guard = message.write_guard();
        if !self.messages.read().contains_key(&message.id) {
            debug!(message_id = %message.id, "skipping write of removed message");
            return Ok(());
        }
        self.write(message)
    }

    /// Caller holds the message's write guard.
    fn write(&self, message: &Message) -> Result<()> {
        let encoded = message.encode()?;
        self.datastore.set(&message.id, &encoded)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Message>> {
        self.messages.read().get(id).cloned()
    }

    /// Drop `id` from the index and the datastore. A record already missing
    /// from the datastore is not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        let message = self.get(id);
        let _guard = message.as_ref().map(|m| m.write_guard());
        self.messages.write().remove(id);
        match self.datastore.delete(id) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(message_id = id, "record already absent from datastore");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the state entries of deleted `subscriptions` from every live
    /// message and rewrite the records that changed. Returns how many
    /// messages changed.
    pub fn forget_subscriptions(&self, subscriptions: &[SubscriptionId]) -> Result<usize> {
        if subscriptions.is_empty() {
            return Ok(0);
        }
        let mut changed = Vec::new();
        for message in self.all() {
            let mut forgot = false;
            for sub in subscriptions {
                forgot |= message.forget(sub);
            }
            if forgot {
                changed.push(message);
            }
        }
        for message in &changed {
            self.persist(message)?;
        }
        Ok(changed.len())
    }

    fn all(&self) -> Vec<Arc<Message>> {
        self.messages.read().values().cloned().collect()
    }

    /// Messages on `topic` that `subscription` may be handed at `now`,
    /// oldest first.
    pub fn readable_for(
        &self,
        topic: &str,
        subscription: &str,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Arc<Message>> {
        let mut readable: Vec<_> = self
            .all()
            .into_iter()
            .filter(|m| m.topic == topic && m.readable_at(subscription, timeout, now))
            .collect();
        readable.sort_by(|a, b| {
            a.published_at
                .cmp(&b.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        readable
    }

    /// Ids of messages every subscription has acked.
    pub fn done_ids(&self) -> Vec<MessageId> {
        self.all()
            .into_iter()
            .filter(|m| m.is_done())
            .map(|m| m.id.clone())
            .collect()
    }

    /// Rebuild the index from every record in the datastore. Records that
    /// fail to decode are skipped. Returns the number of messages loaded.
    pub fn restore(&self) -> Result<usize> {
        let records = self.datastore.dump()?;
        let mut loaded = Vec::with_capacity(records.len());

        for (key, raw) in records {
            match Message::decode(&raw) {
                Ok(message) => loaded.push(Arc::new(message)),
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable record"),
            }
        }

        let count = loaded.len();
        let mut messages = self.messages.write();
        for message in loaded {
            messages.insert(message.id.clone(), message);
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}
