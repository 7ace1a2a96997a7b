//! Per-message delivery state machine
//!
//! Every message tracks one entry per subscription that existed when it was
//! published. An entry moves `Waiting -> Delivered -> Acked` and never
//! backwards. `Acked` is terminal.
//!
//! Each entry also records when it was last handed out, so the visibility
//! timeout is judged per subscription. A `Delivered` entry whose visibility
//! window has lapsed may be handed out again (`redeliver`), which refreshes
//! that timestamp but leaves the state at `Delivered`.
//!
//! Concurrency: the whole map sits behind one `RwLock`. Mutations take the
//! write lock for exactly one lookup-and-update, reads take the read lock.
//! Check-then-set happens under a single write guard, so of N concurrent
//! `deliver` calls for the same subscription exactly one returns `true`.
//! Refused transitions return `false`; they are expected under races and are
//! not errors.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::broker::topic::SubscriptionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Waiting,
    Delivered,
    Acked,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Waiting => "Waiting",
            DeliveryState::Delivered => "Delivered",
            DeliveryState::Acked => "Acked",
        };
        f.write_str(s)
    }
}

/// State of one subscription on one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: DeliveryState,
    /// Last time this entry was handed to a consumer.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl StateEntry {
    fn waiting() -> Self {
        Self {
            state: DeliveryState::Waiting,
            delivered_at: None,
        }
    }

    /// Whether the entry can be handed out at `now`.
    fn is_readable(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.state {
            DeliveryState::Acked => false,
            DeliveryState::Waiting => true,
            DeliveryState::Delivered => self.visibility_expired(timeout, now),
        }
    }

    fn visibility_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.delivered_at {
            Some(at) => now - at > to_delta(timeout),
            None => true,
        }
    }
}

fn to_delta(timeout: Duration) -> TimeDelta {
    TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}

#[derive(Debug, Default)]
pub struct States {
    list: RwLock<HashMap<SubscriptionId, StateEntry>>,
}

impl States {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries.
    pub fn from_entries(entries: HashMap<SubscriptionId, StateEntry>) -> Self {
        Self {
            list: RwLock::new(entries),
        }
    }

    /// Register `id` as `Waiting`. An existing entry is overwritten.
    pub fn add(&self, id: &str) {
        self.list.write().insert(id.to_string(), StateEntry::waiting());
    }

    /// `Waiting -> Delivered`.
    pub fn deliver(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut list = self.list.write();
        match list.get_mut(id) {
            Some(entry) if entry.state == DeliveryState::Waiting => {
                entry.state = DeliveryState::Delivered;
                entry.delivered_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Hand a `Delivered` entry out again once its visibility window has
    /// lapsed. The state stays `Delivered`; only the timestamp moves.
    pub fn redeliver(&self, id: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        let mut list = self.list.write();
        match list.get_mut(id) {
            Some(entry)
                if entry.state == DeliveryState::Delivered
                    && entry.visibility_expired(timeout, now) =>
            {
                entry.delivered_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// `deliver` or `redeliver`, whichever applies, under one write guard.
    pub fn claim(&self, id: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        let mut list = self.list.write();
        match list.get_mut(id) {
            Some(entry) if entry.is_readable(timeout, now) => {
                entry.state = DeliveryState::Delivered;
                entry.delivered_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// `Delivered -> Acked`.
    pub fn ack(&self, id: &str) -> bool {
        let mut list = self.list.write();
        match list.get_mut(id) {
            Some(entry) if entry.state == DeliveryState::Delivered => {
                entry.state = DeliveryState::Acked;
                true
            }
            _ => false,
        }
    }

    /// Restart the visibility window of a `Delivered` entry.
    pub fn extend(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut list = self.list.write();
        match list.get_mut(id) {
            Some(entry) if entry.state == DeliveryState::Delivered => {
                entry.delivered_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drop the entry for `id`, whatever its state. Returns whether one
    /// existed.
    pub fn remove(&self, id: &str) -> bool {
        self.list.write().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<DeliveryState> {
        self.list.read().get(id).map(|entry| entry.state)
    }

    pub fn entry(&self, id: &str) -> Option<StateEntry> {
        self.list.read().get(id).copied()
    }

    /// Unknown and acked subscriptions are never readable.
    pub fn readable(&self, id: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.list
            .read()
            .get(id)
            .is_some_and(|entry| entry.is_readable(timeout, now))
    }

    /// True once every subscription has acked. Vacuously true when the
    /// message had no subscriptions.
    pub fn all_acked(&self) -> bool {
        self.list
            .read()
            .values()
            .all(|entry| entry.state == DeliveryState::Acked)
    }

    pub fn snapshot(&self) -> HashMap<SubscriptionId, StateEntry> {
        self.list.read().clone()
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }
}

impl fmt::Display for States {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.list.read();
        let mut ids: Vec<_> = list.keys().collect();
        ids.sort();
        let parts: Vec<String> = ids
            .into_iter()
            .map(|id| format!("{id}:{}", list[id].state))
            .collect();
        f.write_str(&parts.join(", "))
    }
}
