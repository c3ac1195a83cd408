//! Test doubles for the per-cluster seams, shared by unit tests and the tests/ directory.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lifecycle::RunLifecycle;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio::sync::mpsc;

use crate::cluster::{
    BrokerClient, ClusterConnection, ClusterConsumer, ClusterConsumerFactory, ClusterRequest,
};
use crate::error::ConsumerError;
use crate::types::{ConsumerTopic, ConsumerTopicList, Message, OffsetRange, Topic};

/// One topic on `production-cluster` with its DLQ on `dlq-cluster`.
pub fn test_topics() -> ConsumerTopicList {
    ConsumerTopicList::new(vec![ConsumerTopic::new(
        Topic::new("unit-test", "production-cluster"),
        Topic::new("unit-test-dlq", "dlq-cluster"),
    )])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCall {
    pub topic: String,
    pub partition: i32,
    pub offset_range: OffsetRange,
}

/// Cluster consumer that tracks its lifecycle and every call made to it.
pub struct MockClusterConsumer {
    cluster: String,
    lifecycle: RunLifecycle,
    start_error: Mutex<Option<ConsumerError>>,
    failing_partitions: Mutex<HashSet<i32>>,
    resets: Mutex<Vec<ResetCall>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    sender: Option<mpsc::Sender<Message>>,
}

impl MockClusterConsumer {
    pub fn new(cluster: &str) -> Arc<Self> {
        Arc::new(Self::build(cluster, None, None))
    }

    /// A consumer whose start fails.
    pub fn failing_start(cluster: &str) -> Arc<Self> {
        let err = KafkaError::Subscription(format!("injected start failure on {cluster}"));
        Self::failing_start_with(cluster, err.into())
    }

    /// A consumer whose start fails with `err`.
    pub fn failing_start_with(cluster: &str, err: ConsumerError) -> Arc<Self> {
        Arc::new(Self::build(cluster, Some(err), None))
    }

    /// A consumer that can push messages into the shared channel via [`produce`](Self::produce).
    pub fn with_sender(cluster: &str, sender: mpsc::Sender<Message>) -> Arc<Self> {
        Arc::new(Self::build(cluster, None, Some(sender)))
    }

    fn build(
        cluster: &str,
        start_error: Option<ConsumerError>,
        sender: Option<mpsc::Sender<Message>>,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            lifecycle: RunLifecycle::new(format!("{cluster}-mock")),
            start_error: Mutex::new(start_error),
            failing_partitions: Mutex::new(HashSet::new()),
            resets: Mutex::new(Vec::new()),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            sender,
        }
    }

    /// Make every reset of `partition` fail.
    pub fn fail_reset_for(&self, partition: i32) {
        self.failing_partitions.lock().unwrap().insert(partition);
    }

    pub fn status(&self) -> (bool, bool) {
        self.lifecycle.status()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> Vec<ResetCall> {
        self.resets.lock().unwrap().clone()
    }

    pub async fn produce(&self, topic: &str, partition: i32, offset: i64, payload: &str) {
        let sender = self.sender.as_ref().expect("mock consumer has no sender");
        let message = Message {
            cluster: self.cluster.clone(),
            topic: topic.to_string(),
            partition,
            offset,
            key: None,
            payload: Some(payload.as_bytes().to_vec()),
            timestamp_ms: None,
        };
        sender.send(message).await.expect("shared channel closed");
    }
}

#[async_trait]
impl ClusterConsumer for MockClusterConsumer {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn start(&self) -> Result<(), ConsumerError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self.start_error.lock().unwrap().take();
        self.lifecycle
            .start(|| async move {
                match injected {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
            .await
    }

    async fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.stop(|| async {}).await;
    }

    async fn reset_offset(
        &self,
        topic: &str,
        partition: i32,
        offset_range: OffsetRange,
    ) -> Result<(), ConsumerError> {
        self.resets.lock().unwrap().push(ResetCall {
            topic: topic.to_string(),
            partition,
            offset_range,
        });
        if self.failing_partitions.lock().unwrap().contains(&partition) {
            return Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::UnknownPartition).into());
        }
        Ok(())
    }
}

/// Broker client that counts how often it was closed.
#[derive(Default)]
pub struct CountingBrokerClient {
    closes: Arc<AtomicUsize>,
}

impl CountingBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter that outlives the client once it is boxed into a consumer.
    pub fn closes(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

impl BrokerClient for CountingBrokerClient {
    fn close(&self) -> Result<(), ConsumerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that builds [`MockClusterConsumer`]s, failing for the clusters it was told to.
#[derive(Default)]
pub struct MockClusterFactory {
    failing_clusters: HashSet<String>,
    created: Mutex<BTreeMap<String, Arc<MockClusterConsumer>>>,
    requests: Mutex<Vec<ClusterRequest>>,
    closes: Arc<AtomicUsize>,
}

impl MockClusterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(clusters: &[&str]) -> Self {
        Self {
            failing_clusters: clusters.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn consumer(&self, cluster: &str) -> Option<Arc<MockClusterConsumer>> {
        self.created.lock().unwrap().get(cluster).cloned()
    }

    pub fn requests(&self) -> Vec<ClusterRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Total closes across every broker client this factory handed out.
    pub fn client_closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConsumerFactory for MockClusterFactory {
    async fn create(
        &self,
        request: ClusterRequest,
        messages: mpsc::Sender<Message>,
    ) -> Result<ClusterConnection, ConsumerError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing_clusters.contains(&request.cluster) {
            return Err(ConsumerError::UnknownBrokers(request.cluster));
        }

        let consumer = MockClusterConsumer::with_sender(&request.cluster, messages);
        self.created
            .lock()
            .unwrap()
            .insert(request.cluster.clone(), consumer.clone());

        Ok(ClusterConnection {
            consumer,
            client: Box::new(CountingBrokerClient {
                closes: self.closes.clone(),
            }),
        })
    }
}
