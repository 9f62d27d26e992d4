//! Topic directory
//!
//! Topics are shared broker resources, so every operation here is idempotent:
//! creating an existing topic and deleting a missing one both succeed. No
//! answer is cached; each call asks the broker again.

use std::sync::Arc;

use tracing::{Span, debug, info, info_span};

use crate::broker::{BrokerError, LogBroker};
use crate::utils::{Error, Result};

/// Chat topics have a single, unreplicated partition.
const TOPIC_PARTITIONS: i32 = 1;
const TOPIC_REPLICATION: i32 = 1;

#[derive(Clone)]
pub struct TopicDirectory {
    broker: Arc<dyn LogBroker>,
    span: Span,
}

impl TopicDirectory {
    pub fn new(broker: Arc<dyn LogBroker>) -> Self {
        Self {
            broker,
            span: info_span!("topic_directory"),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let topics = self
            .broker
            .list_topics()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        Ok(topics.iter().any(|t| t == name))
    }

    pub async fn create(&self, name: &str) -> Result<()> {
        match self
            .broker
            .create_topic(name, TOPIC_PARTITIONS, TOPIC_REPLICATION)
            .await
        {
            Ok(()) => {
                info!(parent: &self.span, topic = name, "topic created");
                Ok(())
            }
            // Lost a race with another creator; the topic is there either way.
            Err(BrokerError::TopicAlreadyExists(_)) => {
                debug!(parent: &self.span, topic = name, "topic already exists");
                Ok(())
            }
            Err(BrokerError::Transport(reason)) => Err(Error::BrokerUnavailable(reason)),
            Err(e) => Err(Error::CreateRejected {
                topic: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.broker.delete_topic(name).await {
            Ok(()) => {
                info!(parent: &self.span, topic = name, "topic deleted");
                Ok(())
            }
            Err(BrokerError::UnknownTopic(_)) => {
                debug!(parent: &self.span, topic = name, "topic already gone");
                Ok(())
            }
            Err(BrokerError::Transport(reason)) => Err(Error::BrokerUnavailable(reason)),
            Err(e) => Err(Error::DeleteRejected {
                topic: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Check-then-create. Not atomic against other creators, which `create`
    /// tolerates.
    pub async fn ensure(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            self.create(name).await?;
        }
        Ok(())
    }
}
