use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use multicluster_consumer::test_utils::MockClusterFactory;
use multicluster_consumer::{
    enable_partial_construction, partial_construction_errors, with_message_buffer, ConsumerError,
    ConsumerTopic, ConsumerTopicList, MultiClusterConsumerBuilder, OffsetRange, Topic,
};

fn topics() -> ConsumerTopicList {
    "events@us>events_dlq@dlq,events@eu>events_dlq@dlq"
        .parse()
        .unwrap()
}

#[tokio::test]
async fn messages_from_every_cluster_arrive_on_one_channel() {
    let factory = Arc::new(MockClusterFactory::new());
    let consumer = MultiClusterConsumerBuilder::new("fan-in", topics(), factory.clone())
        .option(with_message_buffer(4))
        .build()
        .await
        .unwrap();
    consumer.start().await.unwrap();

    let us = factory.consumer("us").unwrap();
    let eu = factory.consumer("eu").unwrap();
    us.produce("events", 0, 1, "from us").await;
    eu.produce("events", 2, 7, "from eu").await;

    let messages = consumer.messages();
    let mut received = Vec::new();
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(1), messages.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed");
        received.push((message.cluster, message.partition, message.offset));
    }
    received.sort();

    assert_eq!(
        received,
        vec![("eu".to_string(), 2, 7), ("us".to_string(), 0, 1)]
    );

    consumer.stop().await;
}

#[tokio::test]
async fn messages_survive_stop() {
    let factory = Arc::new(MockClusterFactory::new());
    let consumer = MultiClusterConsumerBuilder::new("drain", topics(), factory.clone())
        .build()
        .await
        .unwrap();
    consumer.start().await.unwrap();

    factory
        .consumer("us")
        .unwrap()
        .produce("events", 0, 0, "late")
        .await;
    consumer.stop().await;

    // the channel stays open, buffered messages can still be drained
    let message = consumer.messages().recv().await.unwrap();
    assert_eq!(message.payload.as_deref(), Some(&b"late"[..]));
}

#[tokio::test]
async fn concurrent_stop_tears_down_once() {
    let factory = Arc::new(MockClusterFactory::new());
    let consumer = Arc::new(
        MultiClusterConsumerBuilder::new("racing", topics(), factory.clone())
            .build()
            .await
            .unwrap(),
    );
    consumer.start().await.unwrap();

    let stops = (0..32).map(|_| {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.stop().await })
    });
    for joined in join_all(stops).await {
        joined.unwrap();
    }

    for cluster in ["dlq", "eu", "us"] {
        let cc = factory.consumer(cluster).unwrap();
        assert_eq!(cc.stop_calls(), 1, "cluster {cluster}");
        assert_eq!(cc.status(), (true, true));
    }
    assert_eq!(factory.client_closes(), 3);
    assert!(consumer.is_closed());
}

#[tokio::test]
async fn closed_wakes_every_waiter() {
    let factory = Arc::new(MockClusterFactory::new());
    let consumer = Arc::new(
        MultiClusterConsumerBuilder::new("waiters", topics(), factory)
            .build()
            .await
            .unwrap(),
    );
    consumer.start().await.unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.closed().await })
        })
        .collect();

    consumer.stop().await;

    let all = tokio::time::timeout(Duration::from_secs(1), join_all(waiters))
        .await
        .expect("waiters should wake after stop");
    assert!(all.iter().all(Result::is_ok));
}

#[tokio::test]
async fn partial_construction_reports_unreachable_dlq_cluster() {
    let factory = Arc::new(MockClusterFactory::failing(&["dlq"]));
    let partial = enable_partial_construction();

    let consumer = MultiClusterConsumerBuilder::new("partial", topics(), factory.clone())
        .option(partial.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(consumer.clusters().collect::<Vec<_>>(), vec!["eu", "us"]);
    consumer.start().await.unwrap();

    let errors = partial_construction_errors(&*partial).unwrap();
    let mut failed: Vec<String> = errors.iter().map(|e| e.topic.to_string()).collect();
    failed.sort();
    assert_eq!(
        failed,
        vec!["events@eu>events_dlq@dlq", "events@us>events_dlq@dlq"]
    );

    // merging needs the DLQ cluster, which was skipped
    let topic = ConsumerTopic::new(Topic::new("events", "us"), Topic::new("events_dlq", "dlq"));
    let err = consumer
        .merge_dlq(&topic, &HashMap::from([(0, OffsetRange::new(0, 5))]))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsumerError::DlqMerge(_)));

    consumer.stop().await;
}

#[tokio::test]
async fn merge_dlq_reports_only_failed_partitions() {
    let factory = Arc::new(MockClusterFactory::new());
    let consumer = MultiClusterConsumerBuilder::new("merge", topics(), factory.clone())
        .build()
        .await
        .unwrap();
    let dlq = factory.consumer("dlq").unwrap();
    dlq.fail_reset_for(1);

    let topic = ConsumerTopic::new(Topic::new("events", "eu"), Topic::new("events_dlq", "dlq"));
    let ranges = HashMap::from([
        (0, OffsetRange::new(0, 10)),
        (1, OffsetRange::new(3, 4)),
        (2, OffsetRange::new(8, 8)),
    ]);

    let err = consumer.merge_dlq(&topic, &ranges).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("partition=1"), "{message}");
    assert!(!message.contains("partition=0"), "{message}");
    assert!(!message.contains("partition=2"), "{message}");
    assert_eq!(dlq.resets().len(), 3);
    assert!(factory.consumer("eu").unwrap().resets().is_empty());
}
