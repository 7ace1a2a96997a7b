pub mod engine;
pub mod message;
pub mod state;
pub mod store;
pub mod topic;

pub use engine::{Broker, ReceivedMessage};
pub use message::{Attributes, Message, MessageId};
pub use state::{DeliveryState, States};
pub use store::MessageStore;
pub use topic::{Subscription, SubscriptionId, Topic};
