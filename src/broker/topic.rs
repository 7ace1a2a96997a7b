//! Topic and subscription registry records
//!
//! A `Topic` holds the names of the subscriptions attached to it. Messages
//! copy that set when they are published; subscriptions attached later do
//! not see older messages.
//!
//! Callers synchronize access (the broker keeps both maps behind locks).

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type SubscriptionId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub subscriptions: BTreeSet<SubscriptionId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: BTreeSet::new(),
        }
    }

    /// Attach a subscription. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.insert(id);
    }

    pub fn unsubscribe(&mut self, id: &str) {
        self.subscriptions.remove(id);
    }

    /// Subscription names at this instant, handed to new messages.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.iter().cloned().collect()
    }
}

/// A named consumer registration on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: SubscriptionId,
    pub topic: String,
    /// Visibility timeout: how long a pulled message stays hidden from this
    /// subscription before it may be pulled again.
    pub ack_timeout: Duration,
}

impl Subscription {
    pub fn new(name: &str, topic: &str, ack_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            ack_timeout,
        }
    }
}
