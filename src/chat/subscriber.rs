//! Topic subscriber
//!
//! A subscription reads the topic's first partition from the oldest retained
//! offset, so every new subscriber sees the full history before live traffic.
//! The partition read runs on its own task and feeds two bounded channels:
//!
//! ```text
//!   broker ──► PartitionReader ──► read loop ──┬──► messages (Message)
//!                                              └──► errors   (BrokerError)
//! ```
//!
//! Both channels apply backpressure: when the consumer stops draining them
//! the read loop waits instead of buffering, and the log keeps the records.
//! Records that fail to decode are skipped.
//!
//! The read loop stops when its cancellation token fires, when both
//! receivers are gone, or when the [`ReaderHandle`] is dropped. The broker
//! reader is dropped with the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info_span};

use super::message::Message;
use crate::broker::{BrokerError, LogBroker, PartitionReader};
use crate::utils::{Error, Result};

/// Capacity of the error channel; the session ends on the first error anyway.
const ERROR_CAPACITY: usize = 8;

#[derive(Clone)]
pub struct Subscriber {
    broker: Arc<dyn LogBroker>,
    capacity: usize,
    span: Span,
}

/// A live subscription to one topic.
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub messages: mpsc::Receiver<Message>,
    pub errors: mpsc::Receiver<BrokerError>,
    pub reader: ReaderHandle,
}

/// Owns the background read loop of a subscription.
#[derive(Debug)]
pub struct ReaderHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub fn new(broker: Arc<dyn LogBroker>, capacity: usize) -> Self {
        Self {
            broker,
            capacity: capacity.max(1),
            span: info_span!("subscriber"),
        }
    }

    /// Opens a subscription whose read loop is a child of `parent`:
    /// cancelling `parent` stops it.
    pub async fn subscribe(
        &self,
        topic: &str,
        parent: &CancellationToken,
    ) -> Result<Subscription> {
        let partitions = self.broker.partitions(topic).await?;
        let partition = partitions
            .first()
            .copied()
            .ok_or_else(|| Error::NoPartitions(topic.to_string()))?;

        let reader = self
            .broker
            .open_reader(topic, partition)
            .await?;

        let (msg_tx, messages) = mpsc::channel(self.capacity);
        let (err_tx, errors) = mpsc::channel(ERROR_CAPACITY);
        let cancel = parent.child_token();

        let span = info_span!(parent: &self.span, "read_loop", topic, partition);
        let task =
            tokio::spawn(read_loop(reader, msg_tx, err_tx, cancel.clone()).instrument(span));

        debug!(parent: &self.span, topic, partition, "subscription opened");
        Ok(Subscription {
            topic: topic.to_string(),
            messages,
            errors,
            reader: ReaderHandle {
                cancel,
                task: Some(task),
            },
        })
    }
}

async fn read_loop(
    mut reader: Box<dyn PartitionReader>,
    messages: mpsc::Sender<Message>,
    errors: mpsc::Sender<BrokerError>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.recv() => next,
        };

        let delivered = match next {
            Ok(record) => match Message::from_record(&record) {
                Ok(message) => tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = messages.send(message) => sent.is_ok(),
                },
                Err(e) => {
                    debug!(offset = record.offset, error = %e, "skipping undecodable record");
                    true
                }
            },
            Err(e) => tokio::select! {
                _ = cancel.cancelled() => break,
                sent = errors.send(e) => sent.is_ok(),
            },
        };

        if !delivered {
            break;
        }
    }

    drop(reader);
    debug!("partition reader released");
}

impl ReaderHandle {
    /// Stops the read loop and waits until the broker reader is released.
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
