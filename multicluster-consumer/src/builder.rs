use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cluster::{BrokerClient, ClusterConsumer, ClusterConsumerFactory, ClusterRequest};
use crate::consumer::MultiClusterConsumer;
use crate::error::ConsumerError;
use crate::metrics_consts::KAFKA_CONSUMER_CLUSTERS_SKIPPED;
use crate::options::{ConsumerOption, Options, TopicError};
use crate::types::ConsumerTopicList;

/// Builds a [`MultiClusterConsumer`] with one cluster consumer per cluster referenced by
/// the topic list.
pub struct MultiClusterConsumerBuilder {
    group_name: String,
    topics: ConsumerTopicList,
    factory: Arc<dyn ClusterConsumerFactory>,
    options: Vec<Arc<dyn ConsumerOption>>,
}

impl MultiClusterConsumerBuilder {
    pub fn new(
        group_name: impl Into<String>,
        topics: ConsumerTopicList,
        factory: Arc<dyn ClusterConsumerFactory>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            topics,
            factory,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, option: Arc<dyn ConsumerOption>) -> Self {
        self.options.push(option);
        self
    }

    /// One request per cluster, subscribing to the primary topics that live there.
    /// Clusters that only host DLQs get a request with no topics, so offsets can still
    /// be reset on them.
    fn cluster_requests(&self) -> Vec<ClusterRequest> {
        let mut by_cluster: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for topic in &self.topics {
            let names = by_cluster.entry(topic.topic.cluster.as_str()).or_default();
            if !names.contains(&topic.topic.name) {
                names.push(topic.topic.name.clone());
            }
            by_cluster.entry(topic.dlq.cluster.as_str()).or_default();
        }

        by_cluster
            .into_iter()
            .map(|(cluster, topics)| ClusterRequest {
                group_name: self.group_name.clone(),
                cluster: cluster.to_string(),
                topics,
            })
            .collect()
    }

    /// Create every cluster consumer.
    ///
    /// Without partial construction the first cluster that fails aborts the build and
    /// the broker clients created so far are closed. With it, failed clusters are
    /// skipped and recorded against each of their topics; the list is handed back to
    /// every option through [`ConsumerOption::record_construction_errors`].
    pub async fn build(self) -> Result<MultiClusterConsumer, ConsumerError> {
        let mut options = Options::default();
        for option in &self.options {
            option.apply(&mut options);
        }

        let (sender, receiver) = mpsc::channel(options.message_buffer);
        let mut consumers: BTreeMap<String, Arc<dyn ClusterConsumer>> = BTreeMap::new();
        let mut clients: BTreeMap<String, Box<dyn BrokerClient>> = BTreeMap::new();
        let mut skipped: Vec<TopicError> = Vec::new();

        for request in self.cluster_requests() {
            let cluster = request.cluster.clone();
            match self.factory.create(request, sender.clone()).await {
                Ok(connection) => {
                    consumers.insert(cluster.clone(), connection.consumer);
                    clients.insert(cluster, connection.client);
                }
                Err(err) if options.partial_construction => {
                    warn!(
                        group = %self.group_name,
                        cluster = %cluster,
                        error = %err,
                        "skipping cluster that failed to initialize"
                    );
                    metrics::counter!(KAFKA_CONSUMER_CLUSTERS_SKIPPED, "cluster" => cluster.clone())
                        .increment(1);
                    let err = Arc::new(err);
                    skipped.extend(
                        self.topics
                            .iter()
                            .filter(|topic| topic.uses_cluster(&cluster))
                            .map(|topic| TopicError {
                                topic: topic.clone(),
                                error: err.clone(),
                            }),
                    );
                }
                Err(err) => {
                    error!(
                        group = %self.group_name,
                        cluster = %cluster,
                        error = %err,
                        "failed to initialize cluster consumer"
                    );
                    for (cluster, client) in &clients {
                        if let Err(err) = client.close() {
                            warn!(cluster = %cluster, error = %err, "failed to close broker client");
                        }
                    }
                    return Err(err);
                }
            }
        }
        // Only the cluster consumers hold senders from here on.
        drop(sender);

        let skipped: Arc<[TopicError]> = skipped.into();
        for option in &self.options {
            option.record_construction_errors(&skipped);
        }

        info!(
            group = %self.group_name,
            clusters = consumers.len(),
            skipped_topics = skipped.len(),
            "multicluster consumer constructed"
        );

        Ok(MultiClusterConsumer::new(
            self.group_name,
            self.topics,
            consumers,
            clients,
            receiver,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{enable_partial_construction, partial_construction_errors};
    use crate::test_utils::{test_topics, MockClusterFactory};
    use crate::types::{ConsumerTopic, Topic};

    fn two_cluster_topics() -> ConsumerTopicList {
        ConsumerTopicList::new(vec![
            ConsumerTopic::new(Topic::new("a", "c1"), Topic::new("a_dlq", "c1")),
            ConsumerTopic::new(Topic::new("b", "c2"), Topic::new("b_dlq", "c2")),
        ])
    }

    #[tokio::test]
    async fn requests_one_consumer_per_cluster() {
        let factory = Arc::new(MockClusterFactory::new());
        let topics = ConsumerTopicList::new(vec![
            ConsumerTopic::new(Topic::new("a", "main"), Topic::new("a_dlq", "dlq")),
            ConsumerTopic::new(Topic::new("b", "main"), Topic::new("b_dlq", "dlq")),
            ConsumerTopic::new(Topic::new("c", "edge"), Topic::new("c_dlq", "dlq")),
        ]);

        let consumer = MultiClusterConsumerBuilder::new("cg", topics, factory.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(
            consumer.clusters().collect::<Vec<_>>(),
            vec!["dlq", "edge", "main"]
        );
        let requests = factory.requests();
        let topics_for = |cluster: &str| {
            requests
                .iter()
                .find(|r| r.cluster == cluster)
                .map(|r| r.topics.clone())
                .unwrap()
        };
        assert_eq!(topics_for("main"), vec!["a", "b"]);
        assert_eq!(topics_for("edge"), vec!["c"]);
        assert!(topics_for("dlq").is_empty());
        assert!(requests.iter().all(|r| r.group_name == "cg"));
    }

    #[tokio::test]
    async fn cluster_failure_aborts_construction_by_default() {
        let factory = Arc::new(MockClusterFactory::failing(&["c2"]));

        let result = MultiClusterConsumerBuilder::new("cg", two_cluster_topics(), factory.clone())
            .build()
            .await;

        assert!(matches!(result, Err(ConsumerError::UnknownBrokers(ref c)) if c == "c2"));
        // c1 was built first and its client is released again
        assert_eq!(factory.client_closes(), 1);
    }

    #[tokio::test]
    async fn partial_construction_skips_failed_clusters() {
        let factory = Arc::new(MockClusterFactory::failing(&["c2"]));
        let partial = enable_partial_construction();

        let consumer = MultiClusterConsumerBuilder::new("cg", two_cluster_topics(), factory.clone())
            .option(partial.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(consumer.clusters().collect::<Vec<_>>(), vec!["c1"]);
        consumer.start().await.unwrap();
        assert_eq!(factory.consumer("c1").unwrap().status(), (true, false));

        let errors = partial_construction_errors(&*partial).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].topic.topic.name, "b");
        assert!(matches!(*errors[0].error, ConsumerError::UnknownBrokers(ref c) if c == "c2"));

        consumer.stop().await;
    }

    #[tokio::test]
    async fn partial_construction_with_every_cluster_failing_starts_vacuously() {
        let factory = Arc::new(MockClusterFactory::failing(&["production-cluster", "dlq-cluster"]));
        let partial = enable_partial_construction();

        let consumer = MultiClusterConsumerBuilder::new("cg", test_topics(), factory)
            .option(partial.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(consumer.clusters().count(), 0);
        consumer.start().await.unwrap();

        // one entry per failed cluster the topic depends on
        let errors = partial.errors().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.topic.topic.name == "unit-test"));
    }

    #[tokio::test]
    async fn partial_construction_without_failures_records_empty_list() {
        let factory = Arc::new(MockClusterFactory::new());
        let partial = enable_partial_construction();

        MultiClusterConsumerBuilder::new("cg", two_cluster_topics(), factory)
            .option(partial.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(partial.errors().map(<[_]>::len), Some(0));
    }
}
