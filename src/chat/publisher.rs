use std::sync::Arc;

use tracing::{Span, debug, info_span};

use super::CHAT_PARTITION;
use super::message::{Message, generate_key};
use crate::broker::LogBroker;
use crate::utils::{Error, Result};

/// Appends client text to a topic as chat messages.
///
/// The topic must already exist; creating it is the caller's job. Failed
/// appends are returned, never retried here.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn LogBroker>,
    span: Span,
}

impl Publisher {
    pub fn new(broker: Arc<dyn LogBroker>) -> Self {
        Self {
            broker,
            span: info_span!("publisher"),
        }
    }

    /// Wraps `raw_text` in a message with a fresh key and appends exactly one
    /// record, keyed by that key.
    pub async fn publish(&self, topic: &str, raw_text: &str) -> Result<Message> {
        let message = Message::new(generate_key()?, raw_text);
        let payload = serde_json::to_vec(&message).map_err(Error::Encode)?;

        let offset = self
            .broker
            .append(topic, CHAT_PARTITION, message.key.as_bytes(), &payload)
            .await?;

        debug!(parent: &self.span, topic, key = %message.key, offset, "message appended");
        Ok(message)
    }
}
