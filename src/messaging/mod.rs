//! Durable messaging: queue, subscriptions, and type-based demultiplexing.

mod message;
mod queue;
mod registry;
mod subscriptions;

pub use message::{ChannelStats, DeadLetter, Message, MessageStatus, SendRequest};
pub use queue::MessageQueue;
pub use registry::HandlerRegistry;
pub use subscriptions::SubscriptionRegistry;

pub(crate) use queue::{insert_message, InsertMessage};
