//! Consume one consumer group from several Kafka clusters as if they were one.

pub mod builder;
pub mod cluster;
pub mod config;
pub mod consumer;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod metrics_consts;
pub mod options;
pub mod types;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

pub use builder::MultiClusterConsumerBuilder;
pub use consumer::{Messages, MultiClusterConsumer};
pub use error::ConsumerError;
pub use options::{
    enable_partial_construction, partial_construction_errors, with_message_buffer,
    ConsumerOption, TopicError,
};
pub use types::{ConsumerTopic, ConsumerTopicList, Message, OffsetRange, Topic};
