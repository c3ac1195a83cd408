use lifecycle::LifecycleError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::types::OffsetRange;

/// Errors raised while building, starting or administering a multi-cluster consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("no brokers configured for cluster {0}")]
    UnknownBrokers(String),
    #[error("no cluster consumer found for cluster {0}")]
    ClusterNotFound(String),
    #[error("invalid offset range {0}")]
    InvalidOffsetRange(OffsetRange),
    #[error("offsets {range} not available, partition holds [{low_watermark}, {high_watermark})")]
    OffsetsUnavailable {
        range: OffsetRange,
        low_watermark: i64,
        high_watermark: i64,
    },
    #[error("cluster consumer for {0} is stopped")]
    Stopped(String),
    #[error("DLQ merge failed for {0}")]
    DlqMerge(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
