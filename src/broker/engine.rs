//! Broker engine
//!
//! `Broker` is the context object the front end talks to. It owns:
//! - the topic and subscription registries
//! - the message store (live index plus datastore write-through)
//!
//! Delivery model:
//! - `publish` builds a message seeded with the topic's current
//!   subscriptions and persists it.
//! - `pull` hands out messages that are readable for a subscription and
//!   marks them delivered. A delivered message stays hidden from that
//!   subscription for its ack timeout, then becomes pullable again.
//! - `ack` finishes delivery for one subscription. Acks for messages that
//!   are not in the delivered state are ignored.
//!
//! Concurrency notes:
//! - All methods take `&self`; share the broker as `Arc<Broker>`.
//! - Registry locks are released before any message lock is taken or any
//!   datastore call is made. When both registries are locked, `topics` is
//!   taken first.
//! - Redelivery is evaluated lazily on each pull; nothing runs on a timer
//!   apart from the optional prune loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::broker::message::{Attributes, Message, MessageId, make_message_id};
use crate::broker::store::MessageStore;
use crate::broker::topic::{Subscription, SubscriptionId, Topic};
use crate::config::BrokerSettings;
use crate::config::Settings;
use crate::persistence::{Datastore, MemoryStore};
use crate::utils::error::{BrokerError, Result};

/// A message as handed to a consumer by `pull`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: Attributes,
    pub published_at: DateTime<Utc>,
}

impl From<&Message> for ReceivedMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            topic: message.topic.clone(),
            data: message.data.clone(),
            attributes: message.attributes.clone(),
            published_at: message.published_at,
        }
    }
}

#[derive(Debug)]
pub struct Broker {
    topics: RwLock<HashMap<String, Topic>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    messages: MessageStore,
    settings: BrokerSettings,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Settings::default().broker)
    }
}

impl Broker {
    pub fn new(datastore: Arc<dyn Datastore>, settings: BrokerSettings) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            messages: MessageStore::new(datastore),
            settings,
        }
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn create_topic(&self, name: &str) -> Result<Topic> {
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return Err(BrokerError::AlreadyExistTopic(name.to_string()));
        }
        let topic = Topic::new(name);
        topics.insert(name.to_string(), topic.clone());
        info!(topic = name, "topic created");
        Ok(topic)
    }

    pub fn get_topic(&self, name: &str) -> Result<Topic> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::NotFoundTopic(name.to_string()))
    }

    /// Topic names, sorted.
    pub fn list_topics(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a topic and every subscription attached to it. Messages
    /// already published stay in the store until they are pruned; the
    /// deleted subscriptions no longer hold them back.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        let removed = {
            let mut topics = self.topics.write();
            let topic = topics
                .remove(name)
                .ok_or_else(|| BrokerError::NotFoundTopic(name.to_string()))?;

            let mut subscriptions = self.subscriptions.write();
            for sub in &topic.subscriptions {
                subscriptions.remove(sub);
            }
            topic.subscription_ids()
        };
        info!(topic = name, subscriptions = removed.len(), "topic deleted");

        let changed = self.messages.forget_subscriptions(&removed)?;
        debug!(topic = name, messages = changed, "dropped state of deleted subscriptions");
        Ok(())
    }

    /// Register a subscription on `topic`. Without `ack_timeout` the
    /// configured default applies. Only messages published afterwards are
    /// delivered to it.
    pub fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_timeout: Option<Duration>,
    ) -> Result<Subscription> {
        let mut topics = self.topics.write();
        let target = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::NotFoundTopic(topic.to_string()))?;

        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(name) {
            return Err(BrokerError::AlreadyExistSubscription(name.to_string()));
        }

        let ack_timeout =
            ack_timeout.unwrap_or(Duration::from_secs(self.settings.ack_timeout_secs));
        let subscription = Subscription::new(name, topic, ack_timeout);
        subscriptions.insert(name.to_string(), subscription.clone());
        target.subscribe(name.to_string());

        info!(
            subscription = name,
            topic,
            ack_timeout = ?ack_timeout,
            "subscription created"
        );
        Ok(subscription)
    }

    pub fn get_subscription(&self, name: &str) -> Result<Subscription> {
        self.subscriptions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::NotFoundSubscription(name.to_string()))
    }

    /// Subscriptions, sorted by name.
    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<_> = self.subscriptions.read().values().cloned().collect();
        subs.sort_by(|a, b| a.name.cmp(&b.name));
        subs
    }

    /// Remove a subscription and its state on every live message, so a
    /// later subscription with the same name starts clean.
    pub fn delete_subscription(&self, name: &str) -> Result<()> {
        let subscription = {
            let mut topics = self.topics.write();
            let mut subscriptions = self.subscriptions.write();
            let subscription = subscriptions
                .remove(name)
                .ok_or_else(|| BrokerError::NotFoundSubscription(name.to_string()))?;

            if let Some(topic) = topics.get_mut(&subscription.topic) {
                topic.unsubscribe(name);
            }
            subscription
        };
        info!(subscription = name, topic = %subscription.topic, "subscription deleted");

        let changed = self
            .messages
            .forget_subscriptions(std::slice::from_ref(&subscription.name))?;
        debug!(subscription = name, messages = changed, "dropped subscription state");
        Ok(())
    }

    /// Publish `data` to `topic`. The message is persisted before it
    /// becomes visible to pulls.
    pub fn publish(&self, topic: &str, data: Vec<u8>, attributes: Attributes) -> Result<MessageId> {
        let subscribers = self.get_topic(topic)?.subscription_ids();

        let message = Arc::new(Message::new(
            make_message_id(),
            topic,
            data,
            attributes,
            &subscribers,
        ));
        let id = message.id.clone();
        self.messages.insert(message)?;

        debug!(
            message_id = %id,
            topic,
            subscribers = subscribers.len(),
            "message published"
        );
        Ok(id)
    }

    /// Hand out up to `max` readable messages for `subscription`. A `max` of
    /// zero, or above the configured limit, is clamped to the limit.
    ///
    /// If writing a claimed message back to the datastore fails, pulling
    /// stops there and the messages claimed so far, including that one, are
    /// still returned. The in-memory state already says they are delivered.
    pub fn pull(&self, subscription: &str, max: usize) -> Result<Vec<ReceivedMessage>> {
        self.pull_at(subscription, max, Utc::now())
    }

    pub fn pull_at(
        &self,
        subscription: &str,
        max: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReceivedMessage>> {
        let sub = self.get_subscription(subscription)?;
        let limit = match max {
            0 => self.settings.max_pull_messages,
            n => n.min(self.settings.max_pull_messages),
        };

        let mut pulled = Vec::new();
        for message in self
            .messages
            .readable_for(&sub.topic, &sub.name, sub.ack_timeout, now)
        {
            if pulled.len() >= limit {
                break;
            }
            // another worker may have claimed it since the scan
            if !message.claim_at(&sub.name, sub.ack_timeout, now) {
                continue;
            }
            pulled.push(ReceivedMessage::from(message.as_ref()));
            if let Err(e) = self.messages.persist(&message) {
                warn!(
                    message_id = %message.id,
                    subscription,
                    error = %e,
                    "failed to persist delivery, returning messages claimed so far"
                );
                break;
            }
        }

        debug!(subscription, count = pulled.len(), "messages pulled");
        Ok(pulled)
    }

    /// Acknowledge `ids` for `subscription`. Unknown ids fail the whole
    /// call before anything is acked; acks on messages that are not
    /// currently delivered are ignored.
    pub fn ack<S: AsRef<str>>(&self, subscription: &str, ids: &[S]) -> Result<()> {
        self.get_subscription(subscription)?;
        let messages = self.lookup(ids)?;

        for message in messages {
            if message.ack(subscription) {
                self.messages.persist(&message)?;
            } else {
                debug!(message_id = %message.id, subscription, "ack ignored");
            }
        }
        Ok(())
    }

    /// Restart the visibility window of delivered `ids` for `subscription`.
    pub fn modify_ack_deadline<S: AsRef<str>>(&self, subscription: &str, ids: &[S]) -> Result<()> {
        self.modify_ack_deadline_at(subscription, ids, Utc::now())
    }

    pub fn modify_ack_deadline_at<S: AsRef<str>>(
        &self,
        subscription: &str,
        ids: &[S],
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.get_subscription(subscription)?;
        let messages = self.lookup(ids)?;

        for message in messages {
            if message.extend_at(subscription, now) {
                self.messages.persist(&message)?;
            } else {
                debug!(message_id = %message.id, subscription, "deadline change ignored");
            }
        }
        Ok(())
    }

    fn lookup<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<Message>>> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.messages
                    .get(id)
                    .ok_or_else(|| BrokerError::NotFoundMessage(id.to_string()))
            })
            .collect()
    }

    /// Remove messages that every subscription has acked. Returns how many
    /// were removed.
    pub fn prune(&self) -> Result<usize> {
        let done = self.messages.done_ids();
        for id in &done {
            self.messages.remove(id)?;
        }
        if !done.is_empty() {
            info!(count = done.len(), "pruned acknowledged messages");
        }
        Ok(done.len())
    }

    /// Reload persisted messages into the live index.
    pub fn restore(&self) -> Result<usize> {
        let count = self.messages.restore()?;
        info!(count, "messages restored from datastore");
        Ok(count)
    }

    /// Periodically prune acknowledged messages. Runs until the task is
    /// dropped.
    pub async fn start_prune_loop(broker: Arc<Broker>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = broker.prune() {
                warn!(error = %e, "prune failed");
            }
        }
    }
}
