//! Per-cluster consumer backed by rdkafka.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use health::{ComponentStatus, HealthHandle, HealthRegistry};
use lifecycle::RunLifecycle;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientConfig, Message as _, Offset, TopicPartitionList};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{
    BrokerClient, ClusterConnection, ClusterConsumer, ClusterConsumerFactory, ClusterRequest,
};
use crate::config::{ClusterBrokers, Config};
use crate::error::ConsumerError;
use crate::metrics_consts::{
    KAFKA_CONSUMER_MESSAGES_RECEIVED, KAFKA_CONSUMER_RECV_ERRORS, KAFKA_RANGE_MESSAGES_READMITTED,
};
use crate::types::{Message, OffsetRange};

/// Creates rdkafka consumers for clusters listed in [`ClusterBrokers`].
pub struct KafkaClusterFactory {
    clusters: ClusterBrokers,
    offset_reset: String,
    auto_commit_interval_ms: u32,
    metadata_timeout: Duration,
    health: Option<(HealthRegistry, Duration)>,
}

impl KafkaClusterFactory {
    pub fn new(
        clusters: ClusterBrokers,
        offset_reset: impl Into<String>,
        auto_commit_interval_ms: u32,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            clusters,
            offset_reset: offset_reset.into(),
            auto_commit_interval_ms,
            metadata_timeout,
            health: None,
        }
    }

    /// Register every message pump with `registry`; a pump that does not check in
    /// within `deadline` is reported as stalled.
    pub fn with_health(mut self, registry: HealthRegistry, deadline: Duration) -> Self {
        self.health = Some((registry, deadline));
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.kafka_clusters.clone(),
            config.kafka_consumer_offset_reset.clone(),
            config.kafka_consumer_auto_commit_interval_ms,
            config.kafka_metadata_timeout.0,
        )
    }

    fn client_config(&self, group_name: &str, hosts: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", hosts)
            .set("group.id", group_name)
            .set("auto.offset.reset", &self.offset_reset)
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.auto_commit_interval_ms.to_string(),
            )
            .set("enable.partition.eof", "false")
            .set("statistics.interval.ms", "10000");
        client_config
    }

    /// Readers that replay an offset range are assigned partitions directly and
    /// never commit, so the group's own progress is left alone.
    fn range_config(client_config: &ClientConfig) -> ClientConfig {
        let mut range_config = client_config.clone();
        range_config
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");
        range_config
    }
}

#[async_trait]
impl ClusterConsumerFactory for KafkaClusterFactory {
    async fn create(
        &self,
        request: ClusterRequest,
        messages: mpsc::Sender<Message>,
    ) -> Result<ClusterConnection, ConsumerError> {
        let hosts = self
            .clusters
            .get(&request.cluster)
            .ok_or_else(|| ConsumerError::UnknownBrokers(request.cluster.clone()))?;
        let client_config = self.client_config(&request.group_name, hosts);
        debug!(cluster = %request.cluster, "rdkafka configuration: {:?}", client_config);

        // "Ping" the cluster by requesting metadata; the client is kept as the broker client
        let metadata_client: BaseConsumer = client_config.create()?;
        let timeout = self.metadata_timeout;
        let (metadata_client, brokers) = tokio::task::spawn_blocking(move || {
            let brokers = metadata_client.fetch_metadata(None, timeout)?.brokers().len();
            Ok::<_, KafkaError>((metadata_client, brokers))
        })
        .await??;
        if brokers == 0 {
            return Err(ConsumerError::UnknownBrokers(request.cluster));
        }
        info!(cluster = %request.cluster, brokers, "connected to kafka cluster");

        let consumer: StreamConsumer = client_config.create()?;
        let client = KafkaBrokerClient::new(&request.cluster, metadata_client);
        let mut consumer = KafkaClusterConsumer::new(
            request.cluster,
            request.topics,
            consumer,
            Self::range_config(&client_config),
            self.metadata_timeout,
            messages,
        );
        if let Some((registry, deadline)) = &self.health {
            consumer = consumer.with_health(registry.clone(), *deadline);
        }

        Ok(ClusterConnection {
            consumer: Arc::new(consumer),
            client: Box::new(client),
        })
    }
}

/// Reads the subscribed topics of one cluster and forwards every message onto the
/// shared channel from a background task. Offset resets replay the requested range
/// through a short-lived reader of their own.
pub struct KafkaClusterConsumer {
    cluster: String,
    topics: Vec<String>,
    consumer: Arc<StreamConsumer>,
    range_config: ClientConfig,
    metadata_timeout: Duration,
    messages: mpsc::Sender<Message>,
    health: Option<(HealthRegistry, Duration)>,
    lifecycle: RunLifecycle,
    shutdown: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl KafkaClusterConsumer {
    pub fn new(
        cluster: String,
        topics: Vec<String>,
        consumer: StreamConsumer,
        range_config: ClientConfig,
        metadata_timeout: Duration,
        messages: mpsc::Sender<Message>,
    ) -> Self {
        let lifecycle = RunLifecycle::new(format!("{cluster}-cluster-consumer"));
        Self {
            cluster,
            topics,
            consumer: Arc::new(consumer),
            range_config,
            metadata_timeout,
            messages,
            health: None,
            lifecycle,
            shutdown: CancellationToken::new(),
            pump: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_health(mut self, registry: HealthRegistry, deadline: Duration) -> Self {
        self.health = Some((registry, deadline));
        self
    }

    async fn begin_consuming(&self) -> Result<(), ConsumerError> {
        if self.topics.is_empty() {
            info!(cluster = %self.cluster, "no topics to subscribe to, serving offset resets only");
            return Ok(());
        }

        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;

        let health = self
            .health
            .as_ref()
            .map(|(registry, deadline)| registry.register(format!("{}-pump", self.cluster), *deadline));
        let handle = tokio::spawn(pump(
            self.cluster.clone(),
            self.consumer.clone(),
            self.messages.clone(),
            self.shutdown.clone(),
            health,
        ));
        *self.pump.lock().await = Some(handle);
        info!(cluster = %self.cluster, topics = ?self.topics, "cluster consumer started");
        Ok(())
    }
}

#[async_trait]
impl ClusterConsumer for KafkaClusterConsumer {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn start(&self) -> Result<(), ConsumerError> {
        self.lifecycle.start(|| self.begin_consuming()).await
    }

    async fn stop(&self) {
        self.lifecycle
            .stop(|| async {
                self.shutdown.cancel();
                let pump = self.pump.lock().await.take();
                let readers: Vec<_> = self.readers.lock().await.drain(..).collect();
                for handle in pump.into_iter().chain(readers) {
                    if let Err(err) = handle.await {
                        warn!(cluster = %self.cluster, error = %err, "background reader ended abnormally");
                    }
                }
                self.consumer.unsubscribe();
                info!(cluster = %self.cluster, "cluster consumer stopped");
            })
            .await;
    }

    /// Re-admit `offset_range` of the partition: a reader assigned to the partition
    /// replays the range, clamped to the offsets the broker still holds, onto the
    /// shared channel. Returns once the reader is assigned; delivery continues in the
    /// background until the end of the range or until the consumer stops.
    async fn reset_offset(
        &self,
        topic: &str,
        partition: i32,
        offset_range: OffsetRange,
    ) -> Result<(), ConsumerError> {
        if !offset_range.is_valid() {
            return Err(ConsumerError::InvalidOffsetRange(offset_range));
        }
        if self.shutdown.is_cancelled() {
            return Err(ConsumerError::Stopped(self.cluster.clone()));
        }

        let reader: StreamConsumer = self.range_config.create()?;
        let timeout = self.metadata_timeout;
        let watermark_topic = topic.to_string();
        let (reader, (low_watermark, high_watermark)) = tokio::task::spawn_blocking(move || {
            let watermarks = reader.fetch_watermarks(&watermark_topic, partition, timeout)?;
            Ok::<_, KafkaError>((reader, watermarks))
        })
        .await??;

        // the high watermark is the offset the next message will be written at
        let start = offset_range.low.max(low_watermark);
        let end = offset_range.high.min(high_watermark - 1);
        if start > end {
            return Err(ConsumerError::OffsetsUnavailable {
                range: offset_range,
                low_watermark,
                high_watermark,
            });
        }

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, partition, Offset::Offset(start))?;
        reader.assign(&assignment)?;

        let range = RangeRead {
            cluster: self.cluster.clone(),
            topic: topic.to_string(),
            partition,
            end,
        };
        let handle = tokio::spawn(read_range(
            reader,
            range,
            self.messages.clone(),
            self.shutdown.clone(),
        ));
        let mut readers = self.readers.lock().await;
        readers.retain(|reader| !reader.is_finished());
        readers.push(handle);

        info!(
            cluster = %self.cluster,
            topic = topic,
            partition = partition,
            start = start,
            end = end,
            "replaying offset range"
        );
        Ok(())
    }
}

impl Drop for KafkaClusterConsumer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Checks in with the health registry at a third of its deadline. A pump blocked on a
/// full channel stops checking in.
async fn pump(
    cluster: String,
    consumer: Arc<StreamConsumer>,
    messages: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    health: Option<HealthHandle>,
) {
    let period = health
        .as_ref()
        .map_or(Duration::from_secs(10), |health| health.deadline() / 3)
        .max(Duration::from_millis(10));
    let mut heartbeat = tokio::time::interval(period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let channel_closed = loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break false,
            _ = heartbeat.tick() => {
                if let Some(health) = &health {
                    health.report_healthy();
                }
                continue;
            }
            received = consumer.recv() => received.map(|borrowed| borrowed.detach()),
        };

        match received {
            Ok(owned) => {
                let message = to_message(&cluster, &owned);
                tokio::select! {
                    _ = shutdown.cancelled() => break false,
                    sent = messages.send(message) => {
                        if sent.is_err() {
                            info!(cluster = %cluster, "message channel closed, stopping pump");
                            break true;
                        }
                    }
                }
                metrics::counter!(KAFKA_CONSUMER_MESSAGES_RECEIVED, "cluster" => cluster.clone())
                    .increment(1);
            }
            Err(err) => {
                error!(cluster = %cluster, error = %err, "error receiving message");
                metrics::counter!(KAFKA_CONSUMER_RECV_ERRORS, "cluster" => cluster.clone())
                    .increment(1);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };

    if let Some(health) = health {
        if channel_closed {
            health.report_status(ComponentStatus::Unhealthy);
        } else {
            health.deregister();
        }
    }
    debug!(cluster = %cluster, "message pump exited");
}

struct RangeRead {
    cluster: String,
    topic: String,
    partition: i32,
    /// Last offset to deliver, inclusive.
    end: i64,
}

async fn read_range(
    reader: StreamConsumer,
    range: RangeRead,
    messages: mpsc::Sender<Message>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = reader.recv() => received.map(|borrowed| borrowed.detach()),
        };

        match received {
            Ok(owned) => {
                let offset = owned.offset();
                // compaction can leave gaps, so the end offset itself may never show up
                if offset > range.end {
                    break;
                }
                let message = to_message(&range.cluster, &owned);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = messages.send(message) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                metrics::counter!(KAFKA_RANGE_MESSAGES_READMITTED, "cluster" => range.cluster.clone())
                    .increment(1);
                if offset >= range.end {
                    break;
                }
            }
            Err(err) => {
                warn!(
                    cluster = %range.cluster,
                    topic = %range.topic,
                    partition = range.partition,
                    error = %err,
                    "error replaying offset range"
                );
                metrics::counter!(KAFKA_CONSUMER_RECV_ERRORS, "cluster" => range.cluster.clone())
                    .increment(1);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    debug!(
        cluster = %range.cluster,
        topic = %range.topic,
        partition = range.partition,
        "range reader exited"
    );
}

fn to_message(cluster: &str, owned: &OwnedMessage) -> Message {
    Message {
        cluster: cluster.to_string(),
        topic: owned.topic().to_string(),
        partition: owned.partition(),
        offset: owned.offset(),
        key: owned.key().map(<[u8]>::to_vec),
        payload: owned.payload().map(<[u8]>::to_vec),
        timestamp_ms: owned.timestamp().to_millis(),
    }
}

/// Metadata client created while probing the cluster. Closing drops it.
pub struct KafkaBrokerClient {
    cluster: String,
    client: std::sync::Mutex<Option<BaseConsumer>>,
}

impl KafkaBrokerClient {
    pub fn new(cluster: &str, client: BaseConsumer) -> Self {
        Self {
            cluster: cluster.to_string(),
            client: std::sync::Mutex::new(Some(client)),
        }
    }
}

impl BrokerClient for KafkaBrokerClient {
    fn close(&self) -> Result<(), ConsumerError> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match client {
            Some(client) => {
                drop(client);
                debug!(cluster = %self.cluster, "broker client closed");
            }
            None => debug!(cluster = %self.cluster, "broker client already closed"),
        }
        Ok(())
    }
}
