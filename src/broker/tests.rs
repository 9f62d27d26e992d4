use std::time::Duration;

use super::memory::MemoryBroker;
use super::{BrokerError, LogBroker};

async fn broker_with_topic(name: &str) -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic(name, 1, 1).await.unwrap();
    broker
}

#[tokio::test]
async fn test_create_then_list() {
    let broker = broker_with_topic("orders").await;
    assert_eq!(broker.list_topics().await.unwrap(), vec!["orders".to_string()]);
    assert_eq!(broker.partitions("orders").await.unwrap(), vec![0]);
}

#[tokio::test]
async fn test_create_existing_topic_reports_already_exists() {
    let broker = broker_with_topic("orders").await;
    let err = broker.create_topic("orders", 1, 1).await.unwrap_err();
    assert_eq!(err, BrokerError::TopicAlreadyExists("orders".into()));
}

#[tokio::test]
async fn test_create_rejects_zero_partitions() {
    let broker = MemoryBroker::new();
    let err = broker.create_topic("orders", 0, 1).await.unwrap_err();
    assert!(matches!(err, BrokerError::Rejected { .. }));
}

#[tokio::test]
async fn test_delete_unknown_topic() {
    let broker = MemoryBroker::new();
    let err = broker.delete_topic("ghost").await.unwrap_err();
    assert_eq!(err, BrokerError::UnknownTopic("ghost".into()));
}

#[tokio::test]
async fn test_append_to_unknown_topic_fails() {
    let broker = MemoryBroker::new();
    let err = broker.append("ghost", 0, b"k", b"v").await.unwrap_err();
    assert_eq!(err, BrokerError::UnknownTopic("ghost".into()));
}

#[tokio::test]
async fn test_append_assigns_sequential_offsets() {
    let broker = broker_with_topic("orders").await;
    assert_eq!(broker.append("orders", 0, b"a", b"1").await.unwrap(), 0);
    assert_eq!(broker.append("orders", 0, b"b", b"2").await.unwrap(), 1);
    assert!(broker.append("orders", 1, b"c", b"3").await.is_err());
}

#[tokio::test]
async fn test_reader_replays_history_then_follows() {
    let broker = broker_with_topic("orders").await;
    broker.append("orders", 0, b"a", b"first").await.unwrap();
    broker.append("orders", 0, b"b", b"second").await.unwrap();

    let mut reader = broker
        .open_reader("orders", 0)
        .await
        .unwrap();

    let r = reader.recv().await.unwrap();
    assert_eq!(r.value.as_deref(), Some(&b"first"[..]));
    assert_eq!(r.key.as_deref(), Some(&b"a"[..]));
    assert_eq!(r.offset, 0);
    assert!(r.timestamp.is_some());
    assert_eq!(reader.recv().await.unwrap().offset, 1);

    let appender = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        appender.append("orders", 0, b"c", b"third").await.unwrap();
    });

    let r = tokio::time::timeout(Duration::from_secs(2), reader.recv())
        .await
        .expect("reader should wake on append")
        .unwrap();
    assert_eq!(r.value.as_deref(), Some(&b"third"[..]));
}

#[tokio::test]
async fn test_delete_wakes_parked_reader_with_error() {
    let broker = broker_with_topic("orders").await;
    let mut reader = broker
        .open_reader("orders", 0)
        .await
        .unwrap();

    let deleter = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        deleter.delete_topic("orders").await.unwrap();
    });

    let err = tokio::time::timeout(Duration::from_secs(2), reader.recv())
        .await
        .expect("reader should wake on delete")
        .unwrap_err();
    assert_eq!(err, BrokerError::UnknownTopic("orders".into()));
    assert!(broker.list_topics().await.unwrap().is_empty());
}

/// Runs against a live cluster: `CHAT_TEST_KAFKA=localhost:9092 cargo test -- --ignored`.
mod kafka {
    use std::time::Duration;

    use uuid::Uuid;

    use rdkafka::types::RDKafkaErrorCode;

    use super::super::kafka::{KafkaBroker, PartitionLookup, TopicMetadata, lookup_partitions};
    use super::super::{BrokerError, LogBroker};
    use crate::config::KafkaSettings;

    fn metadata(
        name: &str,
        partitions: Vec<i32>,
        error: Option<RDKafkaErrorCode>,
    ) -> TopicMetadata {
        TopicMetadata {
            name: name.to_string(),
            partitions,
            error,
        }
    }

    async fn connect() -> KafkaBroker {
        let brokers = std::env::var("CHAT_TEST_KAFKA").unwrap_or_else(|_| "localhost:9092".into());
        KafkaBroker::connect(&KafkaSettings {
            brokers: brokers.split(',').map(str::to_string).collect(),
            client_id: "chatbridge-test".into(),
            operation_timeout_ms: 10_000,
        })
        .await
        .expect("kafka not reachable")
    }

    fn topic_name() -> String {
        format!("chatbridge-test-{}", Uuid::new_v4().simple())
    }

    #[test]
    fn test_lookup_partitions_waits_for_leaders() {
        let topics = vec![metadata(
            "fresh",
            vec![],
            Some(RDKafkaErrorCode::LeaderNotAvailable),
        )];
        assert_eq!(lookup_partitions("fresh", topics), PartitionLookup::Pending);
    }

    #[test]
    fn test_lookup_partitions_keeps_topic_with_partitions_despite_error() {
        let topics = vec![metadata(
            "fresh",
            vec![0],
            Some(RDKafkaErrorCode::LeaderNotAvailable),
        )];
        assert_eq!(
            lookup_partitions("fresh", topics),
            PartitionLookup::Ready(vec![0])
        );
    }

    #[test]
    fn test_lookup_partitions_unknown_topic() {
        let topics = vec![metadata(
            "ghost",
            vec![],
            Some(RDKafkaErrorCode::UnknownTopicOrPartition),
        )];
        assert_eq!(lookup_partitions("ghost", topics), PartitionLookup::Unknown);
        assert_eq!(
            lookup_partitions("ghost", vec![metadata("other", vec![0], None)]),
            PartitionLookup::Unknown
        );
    }

    #[tokio::test]
    async fn test_connect_requires_brokers() {
        let err = KafkaBroker::connect(&KafkaSettings {
            brokers: vec![],
            client_id: "chatbridge-test".into(),
            operation_timeout_ms: 1_000,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_topic_lifecycle() {
        let broker = connect().await;
        let topic = topic_name();

        broker.create_topic(&topic, 1, 1).await.unwrap();
        assert!(broker.list_topics().await.unwrap().contains(&topic));
        assert_eq!(
            broker.create_topic(&topic, 1, 1).await,
            Err(BrokerError::TopicAlreadyExists(topic.clone()))
        );

        broker.delete_topic(&topic).await.unwrap();
        assert!(matches!(
            broker.delete_topic(&topic).await,
            Err(BrokerError::UnknownTopic(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_append_then_read_from_oldest() {
        let broker = connect().await;
        let topic = topic_name();
        broker.create_topic(&topic, 1, 1).await.unwrap();

        let first = broker
            .append(&topic, 0, b"k1", b"one")
            .await
            .unwrap();
        let second = broker
            .append(&topic, 0, b"k2", b"two")
            .await
            .unwrap();
        assert!(second > first);

        let mut reader = broker
            .open_reader(&topic, 0)
            .await
            .unwrap();
        for (key, value) in [(b"k1", b"one"), (b"k2", b"two")] {
            let record = tokio::time::timeout(Duration::from_secs(20), reader.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.key.as_deref(), Some(&key[..]));
            assert_eq!(record.value.as_deref(), Some(&value[..]));
            assert!(record.timestamp.is_some());
        }

        drop(reader);
        broker.delete_topic(&topic).await.unwrap();
    }
}
