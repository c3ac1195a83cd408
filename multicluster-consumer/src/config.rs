use std::collections::HashMap;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::types::ConsumerTopicList;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "multicluster-consumer")]
    pub kafka_consumer_group: String,

    // name@cluster>dlq_name@dlq_cluster, comma separated
    #[envconfig(default = "events@main>events_dlq@main")]
    pub kafka_consumer_topics: ConsumerTopicList,

    // cluster=host:port[,host:port], semicolon separated
    #[envconfig(default = "main=localhost:9092")]
    pub kafka_clusters: ClusterBrokers,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout: EnvMsDuration,

    // a pump that does not check in for this long fails the liveness check
    #[envconfig(default = "30000")]
    pub kafka_pump_health_deadline: EnvMsDuration,

    #[envconfig(default = "1024")]
    pub message_buffer: usize,

    #[envconfig(default = "false")]
    pub partial_construction: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Bootstrap servers for each cluster name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterBrokers(pub HashMap<String, String>);

impl ClusterBrokers {
    pub fn get(&self, cluster: &str) -> Option<&str> {
        self.0.get(cluster).map(String::as_str)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseClusterBrokersError(pub String);

impl FromStr for ClusterBrokers {
    type Err = ParseClusterBrokersError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut clusters = HashMap::new();
        for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((cluster, hosts)) if !cluster.trim().is_empty() && !hosts.trim().is_empty() => {
                    clusters.insert(cluster.trim().to_string(), hosts.trim().to_string());
                }
                _ => return Err(ParseClusterBrokersError(entry.to_string())),
            }
        }
        Ok(ClusterBrokers(clusters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cluster_brokers() {
        let brokers: ClusterBrokers = "main=k1:9092,k2:9092; dlq=k3:9092".parse().unwrap();
        assert_eq!(brokers.get("main"), Some("k1:9092,k2:9092"));
        assert_eq!(brokers.get("dlq"), Some("k3:9092"));
        assert_eq!(brokers.get("edge"), None);
    }

    #[test]
    fn rejects_cluster_without_hosts() {
        assert_eq!(
            "main=".parse::<ClusterBrokers>(),
            Err(ParseClusterBrokersError("main=".to_string()))
        );
        assert!("k1:9092".parse::<ClusterBrokers>().is_err());
    }

    #[test]
    fn parses_ms_duration() {
        let duration: EnvMsDuration = "250".parse().unwrap();
        assert_eq!(duration.0, time::Duration::from_millis(250));
        assert_eq!("soon".parse::<EnvMsDuration>().unwrap_err(), ParseEnvMsDurationError);
    }

    #[test]
    fn defaults_load_from_empty_env() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.kafka_consumer_group, "multicluster-consumer");
        assert_eq!(config.kafka_consumer_topics.names(), vec!["events"]);
        assert_eq!(config.kafka_clusters.get("main"), Some("localhost:9092"));
        assert_eq!(config.bind(), "0.0.0.0:3302");
        assert!(!config.partial_construction);
        assert_eq!(
            config.kafka_pump_health_deadline.0,
            time::Duration::from_secs(30)
        );
    }
}
