//! In-process log broker
//!
//! Every topic is a set of partitions, each a `Vec<Record>` guarded by a
//! mutex. Readers keep their own cursor and park on a `watch` channel that is
//! bumped on every append, so they wake without polling. Deleting a topic
//! flags it and bumps the channel one last time, which makes parked readers
//! observe the deletion and fail the way a real broker read would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{BrokerError, LogBroker, Partition, PartitionReader, Record};

#[derive(Debug)]
struct MemoryPartition {
    records: Mutex<Vec<Record>>,
    appended: watch::Sender<usize>,
}

#[derive(Debug)]
struct MemoryTopic {
    name: String,
    partitions: Vec<MemoryPartition>,
    deleted: AtomicBool,
}

impl MemoryTopic {
    fn new(name: &str, partitions: i32) -> Self {
        let partitions = (0..partitions.max(0))
            .map(|_| MemoryPartition {
                records: Mutex::new(Vec::new()),
                appended: watch::channel(0).0,
            })
            .collect();
        Self {
            name: name.to_string(),
            partitions,
            deleted: AtomicBool::new(false),
        }
    }

    fn partition(&self, partition: Partition) -> Result<&MemoryPartition, BrokerError> {
        usize::try_from(partition)
            .ok()
            .and_then(|idx| self.partitions.get(idx))
            .ok_or_else(|| BrokerError::UnknownTopic(format!("{}/{partition}", self.name)))
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        for p in &self.partitions {
            p.appended.send_modify(|n| *n += 1);
        }
    }
}

/// Append-only log kept in memory. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, Arc<MemoryTopic>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryTopic>>> {
        // A poisoned map is still structurally valid; keep serving.
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn topic(&self, name: &str) -> Result<Arc<MemoryTopic>, BrokerError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }
}

#[async_trait]
impl LogBroker for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        _replication: i32,
    ) -> Result<(), BrokerError> {
        if name.is_empty() || partitions < 1 {
            return Err(BrokerError::Rejected {
                topic: name.to_string(),
                reason: "invalid topic name or partition count".to_string(),
            });
        }
        let mut topics = self.lock();
        if topics.contains_key(name) {
            return Err(BrokerError::TopicAlreadyExists(name.to_string()));
        }
        topics.insert(name.to_string(), Arc::new(MemoryTopic::new(name, partitions)));
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError> {
        let removed = self.lock().remove(name);
        match removed {
            Some(topic) => {
                topic.mark_deleted();
                Ok(())
            }
            None => Err(BrokerError::UnknownTopic(name.to_string())),
        }
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<Partition>, BrokerError> {
        let topic = self.topic(topic)?;
        Ok((0..topic.partitions.len() as Partition).collect())
    }

    async fn append(
        &self,
        topic: &str,
        partition: Partition,
        key: &[u8],
        value: &[u8],
    ) -> Result<i64, BrokerError> {
        let topic = self.topic(topic)?;
        let part = topic.partition(partition)?;

        let offset = {
            let mut records = part.records.lock().unwrap_or_else(|e| e.into_inner());
            let offset = records.len() as i64;
            records.push(Record {
                key: Some(key.to_vec()),
                value: Some(value.to_vec()),
                timestamp: Some(chrono::Utc::now().timestamp_millis()),
                offset,
            });
            offset
        };
        part.appended.send_modify(|n| *n += 1);
        Ok(offset)
    }

    async fn open_reader(
        &self,
        topic: &str,
        partition: Partition,
    ) -> Result<Box<dyn PartitionReader>, BrokerError> {
        let topic = self.topic(topic)?;
        let changes = topic.partition(partition)?.appended.subscribe();

        Ok(Box::new(MemoryReader {
            topic,
            partition,
            next: 0,
            changes,
        }))
    }
}

struct MemoryReader {
    topic: Arc<MemoryTopic>,
    partition: Partition,
    next: usize,
    changes: watch::Receiver<usize>,
}

impl MemoryReader {
    fn record_at_cursor(&self) -> Result<Option<Record>, BrokerError> {
        let part = self.topic.partition(self.partition)?;
        let records = part.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(self.next).cloned())
    }
}

#[async_trait]
impl PartitionReader for MemoryReader {
    async fn recv(&mut self) -> Result<Record, BrokerError> {
        loop {
            // Mark the current version seen before looking, so an append
            // landing after the check still wakes `changed()`.
            self.changes.borrow_and_update();

            if self.topic.deleted.load(Ordering::SeqCst) {
                return Err(BrokerError::UnknownTopic(self.topic.name.clone()));
            }
            if let Some(record) = self.record_at_cursor()? {
                self.next += 1;
                return Ok(record);
            }
            if self.changes.changed().await.is_err() {
                return Err(BrokerError::Transport(format!(
                    "partition {}/{} closed",
                    self.topic.name, self.partition
                )));
            }
        }
    }
}
