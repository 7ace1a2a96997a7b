//! Message definitions for the broker
//!
//! A `Message` is immutable once built, apart from its delivery state. It
//! carries one [`States`] entry per subscription that existed on its topic at
//! publish time, and is shared between workers as `Arc<Message>`.
//!
//! Notes on fields:
//! - `id`: UUID v7, so ids sort roughly by creation time
//! - `data`: opaque payload bytes
//! - `attributes`: string metadata supplied by the publisher
//! - `published_at`: set when the message is built
//!
//! The persisted form is [`StoredMessage`], encoded as JSON.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::state::{DeliveryState, StateEntry, States};
use crate::broker::topic::SubscriptionId;
use crate::utils::error::{BrokerError, Result};

pub type MessageId = String;
pub type Attributes = BTreeMap<String, String>;

pub fn make_message_id() -> MessageId {
    Uuid::now_v7().to_string()
}

#[derive(Debug)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: Attributes,
    pub published_at: DateTime<Utc>,
    /// Most recent hand-out to any subscription. Informational only, the
    /// visibility timeout uses the per-subscription timestamp.
    delivered_at: Mutex<Option<DateTime<Utc>>>,
    states: States,
    /// Serialises snapshot-and-write of this message's record.
    write_lock: Mutex<()>,
}

impl Message {
    pub fn new<S: AsRef<str>>(
        id: MessageId,
        topic: &str,
        data: Vec<u8>,
        attributes: Attributes,
        subscriptions: &[S],
    ) -> Self {
        Self::new_at(id, topic, data, attributes, subscriptions, Utc::now())
    }

    pub fn new_at<S: AsRef<str>>(
        id: MessageId,
        topic: &str,
        data: Vec<u8>,
        attributes: Attributes,
        subscriptions: &[S],
        now: DateTime<Utc>,
    ) -> Self {
        let states = States::new();
        for sub in subscriptions {
            states.add(sub.as_ref());
        }
        Self {
            id,
            topic: topic.to_string(),
            data,
            attributes,
            published_at: now,
            delivered_at: Mutex::new(None),
            states,
            write_lock: Mutex::new(()),
        }
    }

    pub fn states(&self) -> &States {
        &self.states
    }

    pub fn state(&self, subscription: &str) -> Option<DeliveryState> {
        self.states.get(subscription)
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        *self.delivered_at.lock()
    }

    fn touch(&self, now: DateTime<Utc>) {
        let mut delivered_at = self.delivered_at.lock();
        if delivered_at.is_none_or(|at| at < now) {
            *delivered_at = Some(now);
        }
    }

    /// `Waiting -> Delivered` for `subscription`. Returns `false` when
    /// someone else already delivered it (or it was never a target).
    pub fn deliver(&self, subscription: &str) -> bool {
        self.deliver_at(subscription, Utc::now())
    }

    pub fn deliver_at(&self, subscription: &str, now: DateTime<Utc>) -> bool {
        let delivered = self.states.deliver(subscription, now);
        if delivered {
            self.touch(now);
        }
        delivered
    }

    /// `Delivered -> Acked` for `subscription`. Anything else is silently
    /// ignored; the return value only says whether the state moved.
    pub fn ack(&self, subscription: &str) -> bool {
        self.states.ack(subscription)
    }

    /// Whether `subscription` may be handed this message now.
    ///
    /// Unknown or acked subscriptions: never. Waiting: always. Delivered:
    /// only once more than `timeout` has passed since it was handed out.
    pub fn readable(&self, subscription: &str, timeout: Duration) -> bool {
        self.readable_at(subscription, timeout, Utc::now())
    }

    pub fn readable_at(&self, subscription: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.states.readable(subscription, timeout, now)
    }

    /// Check readability and hand the message out in one step. Of several
    /// concurrent claims for the same subscription, one wins.
    pub fn claim(&self, subscription: &str, timeout: Duration) -> bool {
        self.claim_at(subscription, timeout, Utc::now())
    }

    pub fn claim_at(&self, subscription: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        let claimed = self.states.claim(subscription, timeout, now);
        if claimed {
            self.touch(now);
        }
        claimed
    }

    /// Restart the visibility window for a delivered subscription.
    pub fn extend_at(&self, subscription: &str, now: DateTime<Utc>) -> bool {
        self.states.extend(subscription, now)
    }

    /// Stop tracking `subscription` on this message. Used when the
    /// subscription is deleted.
    pub fn forget(&self, subscription: &str) -> bool {
        self.states.remove(subscription)
    }

    /// Held while the record is encoded and written, so writes of the same
    /// message reach the datastore in the order their snapshots were taken.
    pub(crate) fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Every subscription has acked.
    pub fn is_done(&self) -> bool {
        self.states.all_acked()
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            id: self.id.clone(),
            topic: self.topic.clone(),
            data: self.data.clone(),
            attributes: self.attributes.clone(),
            published_at: self.published_at,
            delivered_at: self.delivered_at(),
            states: self.states.snapshot(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_stored()).map_err(BrokerError::Encode)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let stored: StoredMessage =
            serde_json::from_slice(raw).map_err(BrokerError::NotMatchTypeMessage)?;
        Ok(stored.into())
    }
}

/// Persisted record of a message, stored under its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub topic: String,
    pub data: Vec<u8>,
    pub attributes: Attributes,
    pub published_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub states: HashMap<SubscriptionId, StateEntry>,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Self {
            id: stored.id,
            topic: stored.topic,
            data: stored.data,
            attributes: stored.attributes,
            published_at: stored.published_at,
            delivered_at: Mutex::new(stored.delivered_at),
            states: States::from_entries(stored.states),
            write_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn message_for(subs: &[&str]) -> Message {
        Message::new(
            make_message_id(),
            "topic",
            b"payload".to_vec(),
            Attributes::from([("k".to_string(), "v".to_string())]),
            subs,
        )
    }

    #[test]
    fn test_new_message_seeds_waiting_states() {
        let msg = message_for(&["s1", "s2"]);
        assert_eq!(msg.states().len(), 2);
        assert_eq!(msg.state("s1"), Some(DeliveryState::Waiting));
        assert_eq!(msg.state("s2"), Some(DeliveryState::Waiting));
        assert_eq!(msg.delivered_at(), None);
        assert!(msg.published_at <= Utc::now());
    }

    #[test]
    fn test_message_ids_are_unique_and_ordered() {
        let a = make_message_id();
        std::thread::sleep(Duration::from_millis(2));
        let b = make_message_id();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_deliver_records_delivered_at() {
        let msg = message_for(&["s1"]);
        let now = Utc::now();
        assert!(msg.deliver_at("s1", now));
        assert_eq!(msg.delivered_at(), Some(now));

        // a refused transition leaves the timestamp alone
        assert!(!msg.deliver_at("s1", now + TimeDelta::seconds(5)));
        assert_eq!(msg.delivered_at(), Some(now));
    }

    #[test]
    fn test_ack_on_waiting_is_silently_ignored() {
        let msg = message_for(&["s1"]);
        assert!(!msg.ack("s1"));
        assert_eq!(msg.state("s1"), Some(DeliveryState::Waiting));
    }

    #[test]
    fn test_readable_unknown_and_acked() {
        let msg = message_for(&["s1"]);
        let timeout = Duration::from_secs(1);
        assert!(!msg.readable("nobody", timeout));

        assert!(msg.deliver("s1"));
        assert!(msg.ack("s1"));
        assert!(!msg.readable("s1", Duration::ZERO));
        assert!(msg.is_done());
    }

    #[test]
    fn test_visibility_timeout_window() {
        let msg = message_for(&["s1"]);
        let timeout = Duration::from_secs(30);
        let t = Utc::now();

        assert!(msg.deliver_at("s1", t));
        assert!(!msg.readable_at("s1", timeout, t + TimeDelta::seconds(15)));
        assert!(msg.readable_at("s1", timeout, t + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_publish_deliver_scenario_with_simulated_clock() {
        let t0 = Utc::now();
        let msg = Message::new_at(
            make_message_id(),
            "topic",
            b"hello".to_vec(),
            Attributes::new(),
            &["s1", "s2"],
            t0,
        );
        let timeout = Duration::from_secs(30);

        assert!(msg.readable_at("s1", timeout, t0));
        assert!(msg.deliver_at("s1", t0));
        assert!(!msg.readable_at("s1", timeout, t0));
        assert!(!msg.readable_at("s1", timeout, t0 + TimeDelta::seconds(29)));
        assert!(msg.readable_at("s1", timeout, t0 + TimeDelta::seconds(31)));

        // s2 is tracked independently and was never delivered
        for offset in [0, 15, 31, 120] {
            assert!(msg.readable_at("s2", timeout, t0 + TimeDelta::seconds(offset)));
        }
    }

    #[test]
    fn test_visibility_is_per_subscription() {
        let msg = message_for(&["s1", "s2"]);
        let timeout = Duration::from_secs(30);
        let t0 = Utc::now();

        assert!(msg.deliver_at("s1", t0));
        let t1 = t0 + TimeDelta::seconds(25);
        assert!(msg.deliver_at("s2", t1));

        // s1's window ends at t0+30, s2's at t1+30
        let later = t0 + TimeDelta::seconds(40);
        assert!(msg.readable_at("s1", timeout, later));
        assert!(!msg.readable_at("s2", timeout, later));
        assert_eq!(msg.delivered_at(), Some(t1));
    }

    #[test]
    fn test_claim_redelivers_after_timeout() {
        let msg = message_for(&["s1"]);
        let timeout = Duration::from_secs(10);
        let t0 = Utc::now();

        assert!(msg.claim_at("s1", timeout, t0));
        assert!(!msg.claim_at("s1", timeout, t0 + TimeDelta::seconds(5)));

        let t1 = t0 + TimeDelta::seconds(11);
        assert!(msg.claim_at("s1", timeout, t1));
        assert_eq!(msg.state("s1"), Some(DeliveryState::Delivered));
        assert_eq!(msg.delivered_at(), Some(t1));
    }

    #[test]
    fn test_encode_decode_keeps_state() {
        let msg = message_for(&["s1", "s2"]);
        let now = Utc::now();
        assert!(msg.deliver_at("s1", now));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.to_stored(), msg.to_stored());
        assert_eq!(decoded.state("s1"), Some(DeliveryState::Delivered));
        assert_eq!(decoded.state("s2"), Some(DeliveryState::Waiting));
        assert_eq!(decoded.data, b"payload".to_vec());
    }

    #[test]
    fn test_decode_garbage_is_not_match_type() {
        let err = Message::decode(b"not json").unwrap_err();
        assert!(matches!(err, BrokerError::NotMatchTypeMessage(_)));
    }
}
