//! Client side of the partitioned, append-only log broker.
//!
//! The gateway talks to the broker only through [`LogBroker`]. Two backends
//! are provided:
//!
//! - [`kafka::KafkaBroker`]: any Kafka-compatible cluster, via `rdkafka`.
//! - [`memory::MemoryBroker`]: an in-process log with the same semantics,
//!   used by the test suite and by `server --in-memory`.

pub mod kafka;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

pub type Partition = i32;

/// A record as read back from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// Log-append time in milliseconds since the UNIX epoch.
    pub timestamp: Option<i64>,
    pub offset: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("unknown topic or partition: {0}")]
    UnknownTopic(String),

    #[error("request for topic '{topic}' rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

#[async_trait]
pub trait LogBroker: Send + Sync + 'static {
    /// Names of every topic the broker currently knows about.
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<(), BrokerError>;

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError>;

    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>, BrokerError>;

    /// Appends one record and waits for the broker acknowledgement.
    /// Returns the offset assigned to the record.
    async fn append(
        &self,
        topic: &str,
        partition: Partition,
        key: &[u8],
        value: &[u8],
    ) -> Result<i64, BrokerError>;

    /// Opens a reader positioned at the oldest retained record.
    async fn open_reader(
        &self,
        topic: &str,
        partition: Partition,
    ) -> Result<Box<dyn PartitionReader>, BrokerError>;
}

/// A live read over one partition. Dropping the reader releases it on the
/// broker side.
#[async_trait]
pub trait PartitionReader: Send {
    /// Waits for the next record in append order.
    async fn recv(&mut self) -> Result<Record, BrokerError>;
}

#[cfg(test)]
mod tests;
