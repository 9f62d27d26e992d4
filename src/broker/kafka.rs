//! Kafka-compatible backend
//!
//! - Topic management goes through the admin API.
//! - Appends use a `FutureProducer` and wait for the delivery report, so an
//!   append only succeeds once the broker acknowledged it.
//! - Every reader is its own `StreamConsumer`, manually assigned to a single
//!   partition. No consumer-group offsets are committed; dropping the reader
//!   closes the consumer.
//!
//! Metadata requests in librdkafka are blocking calls and run on the
//! blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};
use uuid::Uuid;

use super::{BrokerError, LogBroker, Partition, PartitionReader, Record};
use crate::config::KafkaSettings;

pub struct KafkaBroker {
    base: ClientConfig,
    admin: AdminClient<DefaultClientContext>,
    producer: FutureProducer,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl KafkaBroker {
    /// Builds the clients and checks the cluster answers a metadata request.
    pub async fn connect(settings: &KafkaSettings) -> Result<Self, BrokerError> {
        if settings.brokers.is_empty() {
            return Err(BrokerError::Transport("no broker addresses configured".into()));
        }

        let timeout = Duration::from_millis(settings.operation_timeout_ms);
        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", settings.brokers.join(","))
            .set("client.id", &settings.client_id);

        let admin: AdminClient<DefaultClientContext> = base.create().map_err(transport)?;
        let producer: FutureProducer = base
            .clone()
            .set("message.timeout.ms", settings.operation_timeout_ms.to_string())
            .create()
            .map_err(transport)?;

        let broker = Self {
            base,
            admin,
            producer,
            timeout,
        };

        let topics = broker.fetch_metadata(None).await?;
        info!(topics = topics.len(), "connected to kafka");
        Ok(broker)
    }

    /// Fetches cluster metadata and copies out what the gateway needs, so
    /// nothing borrowed from librdkafka crosses the blocking-pool boundary.
    async fn fetch_metadata(
        &self,
        topic: Option<&str>,
    ) -> Result<Vec<TopicMetadata>, BrokerError> {
        let producer = self.producer.clone();
        let topic = topic.map(str::to_string);
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(topic.as_deref(), timeout)
                .map_err(transport)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| TopicMetadata {
                    name: t.name().to_string(),
                    partitions: t.partitions().iter().map(|p| p.id()).collect(),
                    error: t.error().map(RDKafkaErrorCode::from),
                })
                .collect())
        })
        .await
        .map_err(|e| BrokerError::Transport(format!("metadata task failed: {e}")))?
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.timeout))
    }
}

pub(crate) struct TopicMetadata {
    pub(crate) name: String,
    pub(crate) partitions: Vec<Partition>,
    pub(crate) error: Option<RDKafkaErrorCode>,
}

impl TopicMetadata {
    fn is_unknown(&self) -> bool {
        matches!(
            self.error,
            Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic)
        )
    }
}

/// Partitions of one topic as seen in a metadata response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PartitionLookup {
    Ready(Vec<Partition>),
    /// The topic exists but has no usable partitions yet, as right after
    /// creation while leaders are elected.
    Pending,
    Unknown,
}

pub(crate) fn lookup_partitions(topic: &str, topics: Vec<TopicMetadata>) -> PartitionLookup {
    match topics.into_iter().find(|t| t.name == topic) {
        None => PartitionLookup::Unknown,
        Some(entry) if entry.is_unknown() => PartitionLookup::Unknown,
        Some(entry) if entry.partitions.is_empty() => PartitionLookup::Pending,
        Some(entry) => PartitionLookup::Ready(entry.partitions),
    }
}

/// Metadata lookups made while a new topic's partitions settle.
const PARTITION_LOOKUPS: u32 = 10;
const PARTITION_LOOKUP_BACKOFF: Duration = Duration::from_millis(200);

fn transport(err: KafkaError) -> BrokerError {
    BrokerError::Transport(err.to_string())
}

fn topic_error(topic: &str, err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
            BrokerError::UnknownTopic(topic.to_string())
        }
        _ => transport(err),
    }
}

#[async_trait]
impl LogBroker for KafkaBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let topics = self.fetch_metadata(None).await?;
        Ok(topics
            .into_iter()
            .filter(|t| !t.is_unknown())
            .map(|t| t.name)
            .collect())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<(), BrokerError> {
        let new_topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication));
        let results = self
            .admin
            .create_topics(&[new_topic], &self.admin_options())
            .await
            .map_err(transport)?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicAlreadyExists(topic));
                }
                Err((topic, code)) => {
                    return Err(BrokerError::Rejected {
                        topic,
                        reason: code.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        let results = self
            .admin
            .delete_topics(&[name], &self.admin_options())
            .await
            .map_err(transport)?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((topic, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    return Err(BrokerError::UnknownTopic(topic));
                }
                Err((topic, code)) => {
                    return Err(BrokerError::Rejected {
                        topic,
                        reason: code.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>, BrokerError> {
        for attempt in 1..=PARTITION_LOOKUPS {
            let topics = self.fetch_metadata(Some(topic)).await?;
            match lookup_partitions(topic, topics) {
                PartitionLookup::Ready(partitions) => return Ok(partitions),
                PartitionLookup::Unknown => break,
                PartitionLookup::Pending => {
                    debug!(topic, attempt, "partitions not ready");
                    tokio::time::sleep(PARTITION_LOOKUP_BACKOFF).await;
                }
            }
        }
        Err(BrokerError::UnknownTopic(topic.to_string()))
    }

    async fn append(
        &self,
        topic: &str,
        partition: Partition,
        key: &[u8],
        value: &[u8],
    ) -> Result<i64, BrokerError> {
        let record = FutureRecord::to(topic)
            .partition(partition)
            .key(key)
            .payload(value);

        let (_partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(err, _msg)| topic_error(topic, err))?;
        Ok(offset)
    }

    async fn open_reader(
        &self,
        topic: &str,
        partition: Partition,
    ) -> Result<Box<dyn PartitionReader>, BrokerError> {
        // librdkafka insists on a group id even for manual assignment; it is
        // never committed to, so a throwaway one is enough.
        let consumer: StreamConsumer = self
            .base
            .clone()
            .set("group.id", format!("chatbridge-reader-{}", Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(transport)?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::Beginning)
            .map_err(transport)?;
        consumer.assign(&assignment).map_err(transport)?;

        debug!(topic, partition, "partition reader assigned");
        Ok(Box::new(KafkaReader {
            topic: topic.to_string(),
            consumer,
        }))
    }
}

struct KafkaReader {
    topic: String,
    consumer: StreamConsumer,
}

#[async_trait]
impl PartitionReader for KafkaReader {
    async fn recv(&mut self) -> Result<Record, BrokerError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| topic_error(&self.topic, e))?;

        Ok(Record {
            key: msg.key().map(<[u8]>::to_vec),
            value: msg.payload().map(<[u8]>::to_vec),
            timestamp: msg.timestamp().to_millis(),
            offset: msg.offset(),
        })
    }
}

impl Drop for KafkaReader {
    fn drop(&mut self) {
        self.consumer.unassign().ok();
    }
}
