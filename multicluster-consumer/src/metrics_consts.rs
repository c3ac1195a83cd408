// ==== Coordinator lifecycle metrics ====
/// Counter for multi-cluster consumers that started successfully
pub const KAFKA_CONSUMER_STARTED: &str = "kafka_consumer_started_total";

/// Counter for multi-cluster consumers that completed shutdown
pub const KAFKA_CONSUMER_STOPPED: &str = "kafka_consumer_stopped_total";

/// Counter for per-cluster start failures, labelled by cluster
pub const KAFKA_CONSUMER_START_ERRORS: &str = "kafka_consumer_start_errors_total";

/// Counter for broker clients that failed to close during shutdown
pub const KAFKA_CONSUMER_BROKER_CLOSE_ERRORS: &str = "kafka_consumer_broker_close_errors_total";

// ==== Construction metrics ====
/// Counter for clusters skipped under partial construction
pub const KAFKA_CONSUMER_CLUSTERS_SKIPPED: &str = "kafka_consumer_clusters_skipped_total";

// ==== DLQ metrics ====
/// Counter for partitions whose DLQ merge failed
pub const KAFKA_DLQ_MERGE_PARTITION_ERRORS: &str = "kafka_dlq_merge_partition_errors_total";

/// Counter for messages replayed onto the shared channel by offset resets
pub const KAFKA_RANGE_MESSAGES_READMITTED: &str = "kafka_range_messages_readmitted_total";

// ==== Per-cluster pump metrics ====
/// Counter for messages forwarded onto the shared channel, labelled by cluster
pub const KAFKA_CONSUMER_MESSAGES_RECEIVED: &str = "kafka_consumer_messages_received_total";

/// Counter for receive errors reported by the broker client, labelled by cluster
pub const KAFKA_CONSUMER_RECV_ERRORS: &str = "kafka_consumer_recv_errors_total";
