use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A topic on a named cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub name: String,
    pub cluster: String,
}

impl Topic {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.cluster)
    }
}

/// A topic we consume from, together with the dead letter topic its failed messages
/// are parked on. The two may live on different clusters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTopic {
    pub topic: Topic,
    pub dlq: Topic,
}

impl ConsumerTopic {
    pub fn new(topic: Topic, dlq: Topic) -> Self {
        Self { topic, dlq }
    }

    /// True if either the topic or its DLQ lives on `cluster`.
    pub fn uses_cluster(&self, cluster: &str) -> bool {
        self.topic.cluster == cluster || self.dlq.cluster == cluster
    }
}

impl fmt::Display for ConsumerTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.topic, self.dlq)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid topic entry '{0}', expected name@cluster>dlq_name@dlq_cluster")]
pub struct ParseTopicListError(pub String);

/// Ordered list of the topics a consumer group subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerTopicList(Vec<ConsumerTopic>);

impl ConsumerTopicList {
    pub fn new(topics: Vec<ConsumerTopic>) -> Self {
        Self(topics)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConsumerTopic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|t| t.topic.name.as_str()).collect()
    }

    pub fn dlq_names(&self) -> Vec<&str> {
        self.0.iter().map(|t| t.dlq.name.as_str()).collect()
    }

    /// Every cluster referenced by a topic or a DLQ, sorted and deduplicated.
    pub fn clusters(&self) -> BTreeSet<&str> {
        self.0
            .iter()
            .flat_map(|t| [t.topic.cluster.as_str(), t.dlq.cluster.as_str()])
            .collect()
    }
}

impl From<Vec<ConsumerTopic>> for ConsumerTopicList {
    fn from(topics: Vec<ConsumerTopic>) -> Self {
        Self(topics)
    }
}

impl<'a> IntoIterator for &'a ConsumerTopicList {
    type Item = &'a ConsumerTopic;
    type IntoIter = std::slice::Iter<'a, ConsumerTopic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ConsumerTopicList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", entries.join(","))
    }
}

fn parse_topic(raw: &str, entry: &str) -> Result<Topic, ParseTopicListError> {
    let (name, cluster) = raw
        .split_once('@')
        .map(|(name, cluster)| (name.trim(), cluster.trim()))
        .ok_or_else(|| ParseTopicListError(entry.to_owned()))?;
    if name.is_empty() || cluster.is_empty() {
        return Err(ParseTopicListError(entry.to_owned()));
    }
    Ok(Topic::new(name, cluster))
}

/// Parses `events@main>events_dlq@dlq,clicks@edge>clicks_dlq@dlq`.
impl FromStr for ConsumerTopicList {
    type Err = ParseTopicListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut topics = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (topic, dlq) = entry
                .split_once('>')
                .ok_or_else(|| ParseTopicListError(entry.to_owned()))?;
            topics.push(ConsumerTopic::new(
                parse_topic(topic.trim(), entry)?,
                parse_topic(dlq.trim(), entry)?,
            ));
        }
        Ok(Self(topics))
    }
}

/// An inclusive range of offsets within one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetRange {
    pub low: i64,
    pub high: i64,
}

impl OffsetRange {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn is_valid(&self) -> bool {
        self.low >= 0 && self.low <= self.high
    }
}

impl fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// A message read from any of the clusters, as delivered on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cluster: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub timestamp_ms: Option<i64>,
}
