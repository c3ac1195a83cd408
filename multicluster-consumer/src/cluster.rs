//! Seams between the coordinator and the per-cluster machinery it drives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConsumerError;
use crate::types::{Message, OffsetRange};

/// Consumes from a single cluster and pushes what it reads into the shared channel it
/// was built with. Partition ownership, commits and reconnects are its own business.
#[async_trait]
pub trait ClusterConsumer: Send + Sync {
    fn cluster(&self) -> &str;

    async fn start(&self) -> Result<(), ConsumerError>;

    /// Stop consuming. Must be safe to call on a consumer whose start failed or never ran.
    async fn stop(&self);

    async fn reset_offset(
        &self,
        topic: &str,
        partition: i32,
        offset_range: OffsetRange,
    ) -> Result<(), ConsumerError>;
}

/// Connection resource owned by the coordinator only so it can be closed at shutdown.
#[cfg_attr(test, mockall::automock)]
pub trait BrokerClient: Send + Sync {
    fn close(&self) -> Result<(), ConsumerError>;
}

/// Everything built for one cluster.
pub struct ClusterConnection {
    pub consumer: Arc<dyn ClusterConsumer>,
    pub client: Box<dyn BrokerClient>,
}

/// What a factory needs to know to build one cluster's consumer.
#[derive(Debug, Clone)]
pub struct ClusterRequest {
    pub group_name: String,
    pub cluster: String,
    /// Topics to subscribe to. Empty for clusters that only host DLQs.
    pub topics: Vec<String>,
}

/// Builds per-cluster consumers. Failing here (for example because the cluster's
/// brokers cannot be resolved) is a construction error for that cluster.
#[async_trait]
pub trait ClusterConsumerFactory: Send + Sync {
    async fn create(
        &self,
        request: ClusterRequest,
        messages: mpsc::Sender<Message>,
    ) -> Result<ClusterConnection, ConsumerError>;
}
