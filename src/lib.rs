//! # PubState
//!
//! `pubstate` is the delivery core of a publish/subscribe broker. Producers
//! publish messages to named topics; each subscription attached to a topic
//! receives every message published after it was created, with
//! at-least-once delivery enforced by an ack/visibility-timeout protocol.
//!
//! ## Core Modules
//!
//! - `broker`: topics, subscriptions, messages and the per-subscription
//!   delivery state machine (`Waiting -> Delivered -> Acked`).
//! - `persistence`: the key/value `Datastore` contract with in-memory,
//!   SQLite and sled backends.
//! - `config`: loading settings from file and environment.
//! - `utils`: error types and logging setup.
//!
//! ```no_run
//! use pubstate::broker::{Attributes, Broker};
//!
//! let broker = Broker::default();
//! broker.create_topic("orders").unwrap();
//! broker.create_subscription("billing", "orders", None).unwrap();
//!
//! let id = broker.publish("orders", b"{\"id\":1}".to_vec(), Attributes::new()).unwrap();
//! let pulled = broker.pull("billing", 10).unwrap();
//! broker.ack("billing", &[&id]).unwrap();
//! # let _ = pulled;
//! ```

pub mod broker;
pub mod config;
pub mod persistence;
pub mod utils;
