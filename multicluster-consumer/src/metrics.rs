use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Router};
use health::HealthRegistry;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::consumer::MultiClusterConsumer;

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Build a Router with a metrics endpoint plus liveness and readiness checks. The
/// process is live while every registered message pump checks in, and ready while
/// the consumer is running.
pub fn setup_metrics_router(
    consumer: Arc<MultiClusterConsumer>,
    liveness: HealthRegistry,
) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    let router = Router::new()
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/_readiness",
            get(move || std::future::ready(readiness(&consumer))),
        );
    Ok(router)
}

fn readiness(consumer: &MultiClusterConsumer) -> (StatusCode, &'static str) {
    if consumer.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not running")
    }
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}
