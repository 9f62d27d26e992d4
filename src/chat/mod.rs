//! The `chat` module is the core of the gateway: it turns client text into
//! log records and log records back into chat messages.
//!
//! - `directory`: idempotent topic check/create/delete on the broker.
//! - `publisher`: appends one client message to a topic.
//! - `subscriber`: streams a topic's partition from the oldest offset.
//! - `lease`: counts the sessions holding each topic in this process.
//! - `message`: the chat message model and its record encoding.

pub mod directory;
pub mod lease;
pub mod message;
pub mod publisher;
pub mod subscriber;

pub use directory::TopicDirectory;
pub use lease::{TopicLease, TopicLeases};
pub use message::Message;
pub use publisher::Publisher;
pub use subscriber::{ReaderHandle, Subscriber, Subscription};

use std::sync::Arc;

use crate::broker::{LogBroker, Partition};

/// Chat topics are single-partition logs; everything reads and writes here.
pub const CHAT_PARTITION: Partition = 0;

/// The chat components sharing one broker, handed to every session.
#[derive(Clone)]
pub struct ChatServices {
    pub directory: TopicDirectory,
    pub publisher: Publisher,
    pub subscriber: Subscriber,
}

impl ChatServices {
    pub fn new(broker: Arc<dyn LogBroker>, channel_capacity: usize) -> Self {
        Self {
            directory: TopicDirectory::new(broker.clone()),
            publisher: Publisher::new(broker.clone()),
            subscriber: Subscriber::new(broker, channel_capacity),
        }
    }
}
