use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer, FutureRecord};
use rdkafka::ClientConfig;

use multicluster_consumer::kafka::KafkaClusterFactory;
use multicluster_consumer::{
    ConsumerError, MultiClusterConsumer, MultiClusterConsumerBuilder, OffsetRange,
};

fn mock_cluster(topic: &str) -> MockCluster<'static, DefaultProducerContext> {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    assert_eq!(cluster.create_topic(topic, 1, 1), Ok(()));
    cluster
}

async fn produce(bootstrap_servers: &str, topic: &str, payload: &str) {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("message.timeout.ms", "5000")
        .create()
        .expect("failed to create producer");

    producer
        .send(
            FutureRecord::to(topic).key("key").payload(payload),
            Duration::from_secs(5),
        )
        .await
        .expect("failed to produce");
}

fn factory(brokers: &str) -> KafkaClusterFactory {
    KafkaClusterFactory::new(
        brokers.parse().unwrap(),
        "earliest",
        1000,
        Duration::from_secs(5),
    )
}

async fn next_message(consumer: &MultiClusterConsumer) -> multicluster_consumer::Message {
    tokio::time::timeout(Duration::from_secs(30), consumer.messages().recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn consumes_from_every_cluster() {
    let us = mock_cluster("events");
    let eu = mock_cluster("events");
    let brokers = format!(
        "us={};eu={}",
        us.bootstrap_servers(),
        eu.bootstrap_servers()
    );
    let consumer = MultiClusterConsumerBuilder::new(
        "integration-cg",
        "events@us>events@us,events@eu>events@eu".parse().unwrap(),
        Arc::new(factory(&brokers)),
    )
    .build()
    .await
    .unwrap();
    consumer.start().await.unwrap();

    produce(&us.bootstrap_servers(), "events", "from us").await;
    produce(&eu.bootstrap_servers(), "events", "from eu").await;

    let mut clusters = Vec::new();
    for _ in 0..2 {
        let message = next_message(&consumer).await;
        assert_eq!(message.topic, "events");
        assert_eq!(message.key.as_deref(), Some(&b"key"[..]));
        let payload = String::from_utf8(message.payload.unwrap()).unwrap();
        assert_eq!(payload, format!("from {}", message.cluster));
        clusters.push(message.cluster);
    }
    clusters.sort();
    assert_eq!(clusters, vec!["eu", "us"]);

    let err = consumer
        .reset_offset("us", "events", 0, OffsetRange::new(10, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumerError::InvalidOffsetRange(_)));

    // a subscribed partition can be replayed too
    consumer
        .reset_offset("us", "events", 0, OffsetRange::new(0, 0))
        .await
        .unwrap();
    let replayed = next_message(&consumer).await;
    assert_eq!((replayed.cluster.as_str(), replayed.offset), ("us", 0));
    assert_eq!(replayed.payload.as_deref(), Some(&b"from us"[..]));

    consumer.stop().await;
    tokio::time::timeout(Duration::from_secs(10), consumer.closed())
        .await
        .expect("consumer should close");
}

#[tokio::test]
async fn missing_brokers_abort_construction() {
    let us = mock_cluster("events");

    let result = MultiClusterConsumerBuilder::new(
        "integration-cg",
        "events@us>events_dlq@dlq".parse().unwrap(),
        Arc::new(factory(&format!("us={}", us.bootstrap_servers()))),
    )
    .build()
    .await;

    assert!(matches!(result, Err(ConsumerError::UnknownBrokers(ref c)) if c == "dlq"));
}

#[tokio::test]
async fn merge_dlq_replays_range_onto_shared_channel() {
    let main = mock_cluster("events");
    let dlq = mock_cluster("events_dlq");
    for i in 0..3 {
        produce(&dlq.bootstrap_servers(), "events_dlq", &format!("dead {i}")).await;
    }
    let brokers = format!(
        "main={};dlq={}",
        main.bootstrap_servers(),
        dlq.bootstrap_servers()
    );

    let consumer = MultiClusterConsumerBuilder::new(
        "merge-cg",
        "events@main>events_dlq@dlq".parse().unwrap(),
        Arc::new(factory(&brokers)),
    )
    .build()
    .await
    .unwrap();
    consumer.start().await.unwrap();
    let topic = consumer.topics().iter().next().cloned().unwrap();

    // the range runs past the end of the partition and is clamped to what exists
    consumer
        .merge_dlq(&topic, &HashMap::from([(0, OffsetRange::new(1, 10))]))
        .await
        .unwrap();

    for expected in 1..=2 {
        let message = next_message(&consumer).await;
        assert_eq!(message.cluster, "dlq");
        assert_eq!(message.topic, "events_dlq");
        assert_eq!(message.partition, 0);
        assert_eq!(message.offset, expected);
        assert_eq!(
            message.payload.as_deref(),
            Some(format!("dead {expected}").as_bytes())
        );
    }
    let extra = tokio::time::timeout(Duration::from_millis(500), consumer.messages().recv()).await;
    assert!(extra.is_err(), "nothing past the range is replayed");

    // nothing has been written at offset 5 or later
    let err = consumer
        .merge_dlq(&topic, &HashMap::from([(0, OffsetRange::new(5, 9))]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("partition=0"), "{err}");

    consumer.stop().await;
    let err = consumer
        .reset_offset("dlq", "events_dlq", 0, OffsetRange::new(0, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumerError::Stopped(ref c) if c == "dlq"));
}

#[tokio::test]
async fn pumps_report_liveness_until_stopped() {
    let us = mock_cluster("events");
    let liveness = HealthRegistry::new("liveness");
    let factory = factory(&format!("us={}", us.bootstrap_servers()))
        .with_health(liveness.clone(), Duration::from_secs(30));

    let consumer = MultiClusterConsumerBuilder::new(
        "health-cg",
        "events@us>events@us".parse().unwrap(),
        Arc::new(factory),
    )
    .build()
    .await
    .unwrap();
    consumer.start().await.unwrap();

    let mut status = liveness.get_status();
    for _ in 0..50 {
        if status.healthy {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = liveness.get_status();
    }
    assert!(status.healthy, "{status:?}");
    assert!(status.components.contains_key("us-pump"));

    consumer.stop().await;
    assert!(liveness.get_status().components.is_empty());
}
