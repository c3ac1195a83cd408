//! Consume one consumer group across several Kafka clusters until SIGTERM or SIGINT.
use std::sync::Arc;

use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use multicluster_consumer::config::Config;
use multicluster_consumer::kafka::KafkaClusterFactory;
use multicluster_consumer::metrics::{serve, setup_metrics_router};
use multicluster_consumer::{
    enable_partial_construction, with_message_buffer, ConsumerError, MultiClusterConsumer,
    MultiClusterConsumerBuilder,
};

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

async fn consume(consumer: &MultiClusterConsumer) {
    let messages = consumer.messages();
    let shutdown = shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = messages.recv() => match message {
                Some(message) => debug!(
                    cluster = %message.cluster,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "received message"
                ),
                None => {
                    warn!("every cluster consumer has gone away");
                    break;
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");
    info!("Configuration loaded: {:?}", config);

    let liveness = HealthRegistry::new("liveness");
    let factory = Arc::new(
        KafkaClusterFactory::from_config(&config)
            .with_health(liveness.clone(), config.kafka_pump_health_deadline.0),
    );
    let mut builder = MultiClusterConsumerBuilder::new(
        &config.kafka_consumer_group,
        config.kafka_consumer_topics.clone(),
        factory,
    )
    .option(with_message_buffer(config.message_buffer));

    let partial = enable_partial_construction();
    if config.partial_construction {
        builder = builder.option(partial.clone());
    }

    let consumer = Arc::new(builder.build().await?);
    for skipped in partial.errors().unwrap_or_default() {
        warn!("not consuming {}", skipped);
    }

    let bind = config.bind();
    let router = setup_metrics_router(consumer.clone(), liveness)
        .expect("failed to install metrics recorder");
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    consumer.start().await?;
    consume(&consumer).await;

    consumer.stop().await;
    consumer.closed().await;

    Ok(())
}
