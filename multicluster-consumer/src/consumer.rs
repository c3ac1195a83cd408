use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lifecycle::{LifecycleError, RunLifecycle};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{error, info, warn};

use crate::cluster::{BrokerClient, ClusterConsumer};
use crate::error::ConsumerError;
use crate::metrics_consts::{
    KAFKA_CONSUMER_BROKER_CLOSE_ERRORS, KAFKA_CONSUMER_STARTED, KAFKA_CONSUMER_START_ERRORS,
    KAFKA_CONSUMER_STOPPED, KAFKA_DLQ_MERGE_PARTITION_ERRORS,
};
use crate::types::{ConsumerTopic, ConsumerTopicList, Message, OffsetRange};

/// Read side of the channel every cluster consumer writes into. Cloning shares the
/// same underlying receiver, so concurrent readers split the stream between them.
#[derive(Clone)]
pub struct Messages {
    inner: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl Messages {
    fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Next message from any cluster. `None` once every cluster consumer has dropped
    /// its sender.
    pub async fn recv(&self) -> Option<Message> {
        self.inner.lock().await.recv().await
    }
}

/// Why a coordinator start did not complete. Only `Cluster` failures leave anything
/// behind to tear down; a cluster consumer's own lifecycle errors land there too.
enum StartFailure {
    Rejected(LifecycleError),
    Cluster(ConsumerError),
}

impl From<LifecycleError> for StartFailure {
    fn from(err: LifecycleError) -> Self {
        StartFailure::Rejected(err)
    }
}

/// Consumes one consumer group from several clusters at once.
///
/// Each cluster gets its own [`ClusterConsumer`]; all of them write into one shared
/// channel which callers read through [`messages`](Self::messages). Start and stop
/// act on every cluster as a unit: if one cluster cannot start, every cluster is
/// stopped again before `start` returns.
///
/// The cluster maps are owned exclusively and never change after construction, so
/// they are read without locking.
pub struct MultiClusterConsumer {
    group_name: String,
    topics: ConsumerTopicList,
    cluster_consumers: BTreeMap<String, Arc<dyn ClusterConsumer>>,
    broker_clients: BTreeMap<String, Box<dyn BrokerClient>>,
    messages: Messages,
    done: CancellationToken,
    lifecycle: RunLifecycle,
}

impl MultiClusterConsumer {
    pub fn new(
        group_name: impl Into<String>,
        topics: ConsumerTopicList,
        cluster_consumers: BTreeMap<String, Arc<dyn ClusterConsumer>>,
        broker_clients: BTreeMap<String, Box<dyn BrokerClient>>,
        messages: mpsc::Receiver<Message>,
    ) -> Self {
        let group_name = group_name.into();
        let lifecycle = RunLifecycle::new(format!("{group_name}-consumer"));
        Self {
            group_name,
            topics,
            cluster_consumers,
            broker_clients,
            messages: Messages::new(messages),
            done: CancellationToken::new(),
            lifecycle,
        }
    }

    /// The consumer group name.
    pub fn name(&self) -> &str {
        &self.group_name
    }

    pub fn topics(&self) -> &ConsumerTopicList {
        &self.topics
    }

    /// Names of the clusters this consumer reads from, in sorted order.
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.cluster_consumers.keys().map(String::as_str)
    }

    /// `(started, stopped)` snapshot of the coordinator itself.
    pub fn status(&self) -> (bool, bool) {
        self.lifecycle.status()
    }

    /// True between a successful `start` and the beginning of `stop`.
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Start every cluster consumer, one after the other.
    ///
    /// The first cluster that fails aborts the loop. Before the error is returned the
    /// whole consumer is stopped, which also stops the clusters that did come up, so
    /// the caller never has to clean up a half-started consumer. Calling `start` a
    /// second time fails without touching the running clusters.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let result = self
            .lifecycle
            .start(|| async {
                for (cluster, consumer) in &self.cluster_consumers {
                    if let Err(err) = consumer.start().await {
                        error!(
                            group = %self.group_name,
                            topics = %self.topics,
                            cluster = %cluster,
                            error = %err,
                            "multicluster consumer start error"
                        );
                        metrics::counter!(KAFKA_CONSUMER_START_ERRORS, "cluster" => cluster.clone())
                            .increment(1);
                        return Err(StartFailure::Cluster(err));
                    }
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    group = %self.group_name,
                    topics = %self.topics,
                    clusters = self.cluster_consumers.len(),
                    "multicluster consumer started"
                );
                metrics::counter!(KAFKA_CONSUMER_STARTED, "group" => self.group_name.clone())
                    .increment(1);
                Ok(())
            }
            Err(StartFailure::Rejected(err)) => Err(err.into()),
            Err(StartFailure::Cluster(err)) => {
                self.stop().await;
                Err(err)
            }
        }
    }

    /// Stop every cluster consumer, close every broker client, then fire the done
    /// signal. The teardown runs once no matter how many callers race here; it never
    /// fails, close errors are only logged.
    pub async fn stop(&self) {
        self.lifecycle
            .stop(|| async {
                for consumer in self.cluster_consumers.values() {
                    consumer.stop().await;
                }

                for (cluster, client) in &self.broker_clients {
                    if let Err(err) = client.close() {
                        warn!(
                            group = %self.group_name,
                            cluster = %cluster,
                            error = %err,
                            "failed to close broker client"
                        );
                        metrics::counter!(KAFKA_CONSUMER_BROKER_CLOSE_ERRORS, "cluster" => cluster.clone())
                            .increment(1);
                    }
                }

                self.done.cancel();
                info!(
                    group = %self.group_name,
                    topics = %self.topics,
                    "multicluster consumer stopped"
                );
                metrics::counter!(KAFKA_CONSUMER_STOPPED, "group" => self.group_name.clone())
                    .increment(1);
            })
            .await;
    }

    /// Resolves once [`stop`](Self::stop) has finished tearing everything down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Handle to the shared message stream. The coordinator never closes it.
    pub fn messages(&self) -> Messages {
        self.messages.clone()
    }

    /// Reset the committed offset of a partition on one cluster.
    pub async fn reset_offset(
        &self,
        cluster: &str,
        topic: &str,
        partition: i32,
        offset_range: OffsetRange,
    ) -> Result<(), ConsumerError> {
        let consumer = self
            .cluster_consumers
            .get(cluster)
            .ok_or_else(|| ConsumerError::ClusterNotFound(cluster.to_owned()))?;
        consumer.reset_offset(topic, partition, offset_range).await
    }

    /// Re-admit offset ranges of `topic`'s DLQ for processing, partition by partition.
    ///
    /// Every partition is attempted even if earlier ones fail. Failures are reported
    /// together in one error, ordered by partition. No rollback happens for the
    /// partitions that did succeed.
    pub async fn merge_dlq(
        &self,
        topic: &ConsumerTopic,
        offset_ranges: &HashMap<i32, OffsetRange>,
    ) -> Result<(), ConsumerError> {
        let mut partitions: Vec<(i32, OffsetRange)> = offset_ranges
            .iter()
            .map(|(partition, range)| (*partition, *range))
            .collect();
        partitions.sort_unstable_by_key(|(partition, _)| *partition);

        let mut failures = Vec::new();
        for (partition, offset_range) in partitions {
            let result = self
                .reset_offset(&topic.dlq.cluster, &topic.dlq.name, partition, offset_range)
                .await;
            if let Err(err) = result {
                warn!(
                    group = %self.group_name,
                    dlq = %topic.dlq,
                    partition = partition,
                    range = %offset_range,
                    error = %err,
                    "DLQ merge failed for partition"
                );
                metrics::counter!(KAFKA_DLQ_MERGE_PARTITION_ERRORS, "cluster" => topic.dlq.cluster.clone())
                    .increment(1);
                failures.push(format!("partition={partition} err={err}"));
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        Err(ConsumerError::DlqMerge(failures.join(",")))
    }
}
